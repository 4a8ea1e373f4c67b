//! Provider fallback chain.
//!
//! Walks an ordered candidate list, leasing a key per attempt and classifying
//! each failure: rate limits cool the key and advance, auth failures advance
//! without cooling, timeouts advance. When every candidate is spent (or the
//! deadline passes) the chain returns a deterministic instant fallback
//! instead of an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opal_core::OpalConfig;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::keypool::KeyPool;
use crate::providers::{ChatProvider, ProviderError};
use crate::types::{Candidate, ProviderId};

/// Returned verbatim when no provider could be reached.
pub const INSTANT_FALLBACK_TEXT: &str =
    "I'm having trouble reaching my providers right now. Please try again in a moment.";

/// `provider_used` label for the instant fallback path.
pub const FALLBACK_PROVIDER_LABEL: &str = "fallback";

const HISTORY_CAP: usize = 1000;
const HISTORY_KEEP: usize = 500;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Time limits for chain traversal.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Ceiling on any single provider call.
    pub attempt_timeout: Duration,
    /// Default total budget when the caller supplies no deadline.
    pub retry_budget: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(12),
            retry_budget: Duration::from_secs(30),
        }
    }
}

impl ChainConfig {
    pub fn from_config(config: &OpalConfig) -> Self {
        Self {
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            retry_budget: Duration::from_millis(config.retry_budget_ms),
        }
    }
}

/// Why an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RateLimited,
    Timeout,
    AuthError,
    ModelUnavailable,
    NetworkError,
    /// No key could be leased for the candidate's provider.
    KeysExhausted,
}

/// One chain attempt, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub provider: ProviderId,
    pub model: String,
    /// Key slot the attempt used, if one was leased.
    pub key_slot: Option<usize>,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
}

/// The result of a chain traversal. Always carries content; `provider` is
/// `None` only on the instant fallback path.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub content: String,
    pub provider: Option<ProviderId>,
    pub attempts: Vec<Attempt>,
}

impl ChainOutcome {
    pub fn is_fallback(&self) -> bool {
        self.provider.is_none()
    }

    /// Label for the `provider_used` response field.
    pub fn provider_label(&self) -> String {
        match self.provider {
            Some(id) => id.as_str().to_string(),
            None => FALLBACK_PROVIDER_LABEL.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// FallbackChain
// ---------------------------------------------------------------------------

/// Walks provider candidates until one succeeds.
pub struct FallbackChain {
    providers: HashMap<ProviderId, Arc<dyn ChatProvider>>,
    keys: Arc<KeyPool>,
    config: ChainConfig,
    /// Rolling attempt history across requests, capped.
    history: Mutex<Vec<Attempt>>,
}

impl FallbackChain {
    pub fn new(
        providers: HashMap<ProviderId, Arc<dyn ChatProvider>>,
        keys: Arc<KeyPool>,
        config: ChainConfig,
    ) -> Self {
        Self {
            providers,
            keys,
            config,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Try each candidate in order until one succeeds or the deadline passes.
    /// Never returns an error: exhaustion degrades to the instant fallback.
    pub async fn resolve(
        &self,
        candidates: &[Candidate],
        prompt: &str,
        deadline: Instant,
    ) -> ChainOutcome {
        let mut attempts: Vec<Attempt> = Vec::new();

        for candidate in candidates {
            let now = Instant::now();
            if now >= deadline {
                debug!("Retry budget spent, stopping chain traversal");
                break;
            }

            let Some(client) = self.providers.get(&candidate.provider) else {
                warn!(provider = %candidate.provider, "No client registered, skipping");
                continue;
            };

            let lease = match self.keys.acquire(candidate.provider) {
                Ok(lease) => lease,
                Err(_) => {
                    debug!(provider = %candidate.provider, "All keys cooling, skipping");
                    attempts.push(Attempt {
                        provider: candidate.provider,
                        model: candidate.model.clone(),
                        key_slot: None,
                        outcome: AttemptOutcome::KeysExhausted,
                        latency_ms: 0,
                    });
                    continue;
                }
            };

            let budget = (deadline - now).min(self.config.attempt_timeout);
            let started = Instant::now();
            let result = tokio::time::timeout(
                budget,
                client.complete(prompt, &candidate.model, &lease.key),
            )
            .await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let outcome = match &result {
                Ok(Ok(_)) => AttemptOutcome::Success,
                Ok(Err(ProviderError::RateLimited)) => AttemptOutcome::RateLimited,
                Ok(Err(ProviderError::Timeout)) | Err(_) => AttemptOutcome::Timeout,
                Ok(Err(ProviderError::AuthError(_))) => AttemptOutcome::AuthError,
                Ok(Err(ProviderError::ModelUnavailable(_))) => AttemptOutcome::ModelUnavailable,
                Ok(Err(ProviderError::Network(_) | ProviderError::Other(_))) => {
                    AttemptOutcome::NetworkError
                }
            };
            attempts.push(Attempt {
                provider: candidate.provider,
                model: candidate.model.clone(),
                key_slot: Some(lease.slot),
                outcome,
                latency_ms,
            });

            match result {
                Ok(Ok(content)) => {
                    self.keys.report_success(&lease);
                    info!(
                        provider = %candidate.provider,
                        model = %candidate.model,
                        latency_ms,
                        "Provider call succeeded"
                    );
                    self.record(&attempts);
                    return ChainOutcome {
                        content,
                        provider: Some(candidate.provider),
                        attempts,
                    };
                }
                Ok(Err(ProviderError::RateLimited)) => {
                    self.keys.report_rate_limited(&lease);
                    warn!(provider = %candidate.provider, "Rate limited, advancing chain");
                }
                Ok(Err(ProviderError::AuthError(reason))) => {
                    // Bad credentials will not heal with time; advance
                    // without cooling the slot.
                    warn!(
                        provider = %candidate.provider,
                        slot = lease.slot,
                        %reason,
                        "Authentication failed, advancing chain"
                    );
                }
                Ok(Err(err)) => {
                    warn!(provider = %candidate.provider, %err, "Provider call failed, advancing chain");
                }
                Err(_) => {
                    warn!(
                        provider = %candidate.provider,
                        budget_ms = budget.as_millis() as u64,
                        "Provider call timed out, advancing chain"
                    );
                }
            }
        }

        info!(
            attempted = attempts.len(),
            "All candidates exhausted, returning instant fallback"
        );
        self.record(&attempts);
        ChainOutcome {
            content: INSTANT_FALLBACK_TEXT.to_string(),
            provider: None,
            attempts,
        }
    }

    fn record(&self, attempts: &[Attempt]) {
        let mut history = self.history.lock();
        history.extend_from_slice(attempts);
        if history.len() > HISTORY_CAP {
            let excess = history.len() - HISTORY_KEEP;
            history.drain(..excess);
        }
    }

    /// Most recent attempts, newest last.
    pub fn recent_attempts(&self, limit: usize) -> Vec<Attempt> {
        let history = self.history.lock();
        let start = history.len().saturating_sub(limit);
        history[start..].to_vec()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
