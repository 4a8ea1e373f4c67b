//! OpenAI-compatible provider.
//!
//! Covers OpenAI itself and any backend exposing the `/chat/completions`
//! shape (Groq, OpenRouter-style proxies) via a custom base URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatProvider, ProviderError, error_for_status, error_for_transport};
use crate::types::ProviderId;

const OPENAI_BASE: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// API types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<MessageBody<'a>>,
}

#[derive(Debug, Serialize)]
struct MessageBody<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionsResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Client for any `/chat/completions`-shaped API.
pub struct OpenAiCompatProvider {
    id: ProviderId,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// `base_url` should include the `/v1`-style prefix but not the
    /// `/chat/completions` path (e.g. `https://api.groq.com/openai/v1`).
    pub fn new(id: ProviderId, base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            id,
            base_url: base_url.unwrap_or_else(|| OPENAI_BASE.to_string()),
            client,
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        api_key: &str,
    ) -> Result<String, ProviderError> {
        let body = CompletionsRequest {
            model,
            messages: vec![MessageBody {
                role: "user",
                content: prompt,
            }],
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!(provider = %self.id, model, "Chat completion request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(error_for_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, body));
        }

        let parsed: CompletionsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("malformed response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| ProviderError::Other("empty completion".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_tolerated() {
        let provider = OpenAiCompatProvider::new(
            ProviderId::Groq,
            Some("https://api.groq.com/openai/v1/".into()),
        );
        let url = format!("{}/chat/completions", provider.base_url.trim_end_matches('/'));
        assert_eq!(url, "https://api.groq.com/openai/v1/chat/completions");
    }

    #[test]
    fn response_takes_first_choice() {
        let raw = r#"{"choices":[
            {"message":{"content":"first"}},
            {"message":{"content":"second"}}
        ]}"#;
        let parsed: CompletionsResponse = serde_json::from_str(raw).unwrap();
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap();
        assert_eq!(content, "first");
    }

    #[test]
    fn missing_content_is_none() {
        let raw = r#"{"choices":[{"message":{}}]}"#;
        let parsed: CompletionsResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
