use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// An incoming natural-language query. Immutable once created; the cache
/// fingerprint is derived from `text` and `conversation_context`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub user_id: String,
    /// Most recent conversation turns, oldest first.
    #[serde(default)]
    pub conversation_context: Vec<String>,
    /// Attachment references (paths or URLs); opaque to the routing core.
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl Query {
    /// Create a query with no context or attachments.
    pub fn new(text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_id: user_id.into(),
            conversation_context: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.conversation_context = context;
        self
    }
}

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// The routing category assigned to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    GeneralChat,
    RealtimeSearch,
    AppControl,
    ImageGeneration,
    Music,
    WebSearch,
    DocumentQa,
    CodeExecution,
    SaasAction,
}

impl Intent {
    /// Every intent, in a fixed order (used for deterministic tie-breaking).
    pub const ALL: [Intent; 9] = [
        Intent::GeneralChat,
        Intent::RealtimeSearch,
        Intent::AppControl,
        Intent::ImageGeneration,
        Intent::Music,
        Intent::WebSearch,
        Intent::DocumentQa,
        Intent::CodeExecution,
        Intent::SaasAction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GeneralChat => "general_chat",
            Self::RealtimeSearch => "realtime_search",
            Self::AppControl => "app_control",
            Self::ImageGeneration => "image_generation",
            Self::Music => "music",
            Self::WebSearch => "web_search",
            Self::DocumentQa => "document_qa",
            Self::CodeExecution => "code_execution",
            Self::SaasAction => "saas_action",
        }
    }

    /// Whether this intent is handed off to the automation/SaaS layer rather
    /// than resolved through a language model.
    pub fn is_delegated(&self) -> bool {
        matches!(self, Self::AppControl | Self::SaasAction)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// The result of classifying a query, refined by the trigger ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Name of the pattern rule that fired, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    /// Best exemplar cosine similarity, if the semantic signal voted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_exemplar_similarity: Option<f32>,
}

impl Classification {
    pub fn new(intent: Intent, confidence: f32) -> Self {
        Self {
            intent,
            confidence: confidence.clamp(0.0, 1.0),
            matched_rule: None,
            matched_exemplar_similarity: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Supported upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Anthropic,
    OpenAi,
    Groq,
    Google,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Groq => "groq",
            Self::Google => "google",
        }
    }

    /// Parse a configured provider name. Unknown names return `None` so the
    /// registry can skip them with a warning instead of failing startup.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "anthropic" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            "groq" => Some(Self::Groq),
            "google" => Some(Self::Google),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (provider, model) pair in a fallback chain attempt order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub provider: ProviderId,
    pub model: String,
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Resolved through a language-model provider (or the cache).
    Chat,
    /// Produced by the automation/SaaS delegate; content is opaque.
    Delegated,
    /// Deterministic instant fallback; no provider was reached.
    Fallback,
}

/// The structured response returned to the caller. The orchestrator always
/// produces one of these; it never surfaces an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResponse {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    pub content: String,
    /// Provider name, `"automation"` for delegated intents, or `"fallback"`.
    pub provider_used: String,
    pub cached: bool,
    pub intent: Intent,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_round_trips_through_serde() {
        for intent in Intent::ALL {
            let json = serde_json::to_string(&intent).unwrap();
            assert_eq!(json, format!("\"{}\"", intent.as_str()));
            let parsed: Intent = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, intent);
        }
    }

    #[test]
    fn delegated_intents() {
        assert!(Intent::AppControl.is_delegated());
        assert!(Intent::SaasAction.is_delegated());
        assert!(!Intent::Music.is_delegated());
        assert!(!Intent::GeneralChat.is_delegated());
    }

    #[test]
    fn provider_name_parsing() {
        assert_eq!(ProviderId::from_name("Anthropic"), Some(ProviderId::Anthropic));
        assert_eq!(ProviderId::from_name("openai"), Some(ProviderId::OpenAi));
        assert_eq!(ProviderId::from_name("mystery"), None);
    }

    #[test]
    fn classification_clamps_confidence() {
        assert_eq!(Classification::new(Intent::Music, 1.7).confidence, 1.0);
        assert_eq!(Classification::new(Intent::Music, -0.2).confidence, 0.0);
    }

    #[test]
    fn response_serializes_kind_as_type() {
        let response = RouteResponse {
            kind: ResponseKind::Fallback,
            content: "x".into(),
            provider_used: "fallback".into(),
            cached: false,
            intent: Intent::GeneralChat,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"type\":\"fallback\""));
        assert!(json.contains("\"intent\":\"general_chat\""));
    }
}
