//! Provider trait and implementations.
//!
//! Every upstream is modeled as the same narrow capability: complete a
//! prompt with a named model using a caller-supplied key. Keys come in per
//! call because rotation lives in the [`crate::keypool::KeyPool`], not in
//! the client.

pub mod anthropic;
pub mod openai_compat;

use async_trait::async_trait;

use crate::types::ProviderId;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors any provider may return. The fallback chain keys its advance and
/// cooldown decisions off these variants.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Rate limited")]
    RateLimited,

    #[error("Timeout")]
    Timeout,

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model not available: {0}")]
    ModelUnavailable(String),

    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Non-transient errors are skipped by the chain without cooling a key.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::AuthError(_) | Self::ModelUnavailable(_))
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Uniform completion interface over all upstream backends.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Which provider this client talks to.
    fn id(&self) -> ProviderId;

    /// Complete `prompt` with `model`, authenticating with `api_key`.
    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        api_key: &str,
    ) -> Result<String, ProviderError>;
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Map an HTTP status to the provider error taxonomy.
pub(crate) fn error_for_status(status: reqwest::StatusCode, body: String) -> ProviderError {
    match status.as_u16() {
        429 => ProviderError::RateLimited,
        401 | 403 => ProviderError::AuthError(body),
        404 => ProviderError::ModelUnavailable(body),
        500..=599 => ProviderError::Network(format!("upstream {status}: {body}")),
        _ => ProviderError::Other(format!("{status}: {body}")),
    }
}

/// Map a reqwest transport error.
pub(crate) fn error_for_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            error_for_status(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new()),
            ProviderError::RateLimited
        ));
        assert!(matches!(
            error_for_status(reqwest::StatusCode::UNAUTHORIZED, String::new()),
            ProviderError::AuthError(_)
        ));
        assert!(matches!(
            error_for_status(reqwest::StatusCode::NOT_FOUND, String::new()),
            ProviderError::ModelUnavailable(_)
        ));
        assert!(matches!(
            error_for_status(reqwest::StatusCode::BAD_GATEWAY, String::new()),
            ProviderError::Network(_)
        ));
    }

    #[test]
    fn transience() {
        assert!(ProviderError::RateLimited.is_transient());
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::Network("x".into()).is_transient());
        assert!(!ProviderError::AuthError("bad key".into()).is_transient());
        assert!(!ProviderError::ModelUnavailable("gone".into()).is_transient());
    }
}
