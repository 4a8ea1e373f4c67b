use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Provider settings
// ---------------------------------------------------------------------------

/// Per-provider configuration: credentials plus the model name used for each
/// complexity tier. The position of an entry in [`OpalConfig::providers`]
/// determines its routing priority (first entry is tried first).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Provider name: `anthropic`, `openai`, `groq`, `google`.
    pub name: String,
    /// API keys rotated by the key pool. May be empty here if the keys are
    /// supplied through the `OPAL_<NAME>_KEYS` environment variable instead.
    pub api_keys: Vec<String>,
    /// Model used for low-complexity queries.
    pub fast_model: String,
    /// Model used for high-complexity queries.
    pub strong_model: String,
    /// Override for OpenAI-compatible providers hosted at a custom endpoint.
    pub base_url: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            api_keys: Vec::new(),
            fast_model: String::new(),
            strong_model: String::new(),
            base_url: None,
        }
    }
}

// ---------------------------------------------------------------------------
// OpalConfig
// ---------------------------------------------------------------------------

/// Application configuration stored at `~/.opal/config.json`.
///
/// Read once at process start; routing components receive the values they
/// need at construction time and never re-read the file per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpalConfig {
    /// Providers in priority order (primary first).
    pub providers: Vec<ProviderSettings>,

    // Response cache
    /// Time-to-live for cache entries, in seconds.
    pub cache_ttl_secs: u64,
    /// Maximum number of cache entries before LRU eviction. `0` disables
    /// the cache entirely.
    pub cache_capacity: usize,
    /// Minimum cosine similarity for a semantic cache hit.
    pub semantic_hit_threshold: f32,

    // Key cooldown backoff
    /// Base cooldown after the first rate-limit failure on a key, in ms.
    pub backoff_base_ms: u64,
    /// Upper bound on a key's cooldown, in ms.
    pub backoff_cap_ms: u64,

    // Fallback chain budgets
    /// Timeout for a single provider attempt, in ms.
    pub attempt_timeout_ms: u64,
    /// Wall-clock ceiling across the whole fallback chain, in ms.
    pub retry_budget_ms: u64,

    // Trigger ensemble thresholds
    /// Confidence assigned to a matching pattern rule.
    pub pattern_vote: f32,
    /// A disagreeing pattern rule only wins above this score.
    pub pattern_override_threshold: f32,
    /// Minimum exemplar similarity for the semantic signal to vote.
    pub semantic_vote_threshold: f32,
    /// Margin by which exemplar similarity must beat the classifier's
    /// confidence to override its intent.
    pub semantic_margin: f32,
}

impl Default for OpalConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderSettings {
                    name: "anthropic".into(),
                    api_keys: Vec::new(),
                    fast_model: "claude-haiku-4-5-20251001".into(),
                    strong_model: "claude-sonnet-4-20250514".into(),
                    base_url: None,
                },
                ProviderSettings {
                    name: "openai".into(),
                    api_keys: Vec::new(),
                    fast_model: "gpt-4o-mini".into(),
                    strong_model: "gpt-4o".into(),
                    base_url: None,
                },
                ProviderSettings {
                    name: "groq".into(),
                    api_keys: Vec::new(),
                    fast_model: "llama-3.1-8b-instant".into(),
                    strong_model: "llama-3.3-70b-versatile".into(),
                    base_url: Some("https://api.groq.com/openai/v1".into()),
                },
            ],
            cache_ttl_secs: 300,
            cache_capacity: 256,
            semantic_hit_threshold: 0.92,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 300_000,
            attempt_timeout_ms: 12_000,
            retry_budget_ms: 30_000,
            pattern_vote: 0.9,
            pattern_override_threshold: 0.85,
            semantic_vote_threshold: 0.6,
            semantic_margin: 0.15,
        }
    }
}

impl OpalConfig {
    /// Base directory: `~/.opal`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".opal"))
    }

    /// Path to the config file: `~/.opal/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Directory for rotating log files: `~/.opal/logs`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Load the configuration from disk, falling back to defaults if the file
    /// is missing. Environment-supplied API keys are merged in either way.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?
        } else {
            info!("No config file found, using defaults");
            Self::default()
        };
        config.apply_env_keys();
        Ok(config)
    }

    /// Load from an explicit path (tests, embedded scenarios).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.apply_env_keys();
        Ok(config)
    }

    /// Persist the configuration as pretty-printed JSON.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Merge API keys from `OPAL_<NAME>_KEYS` environment variables
    /// (comma-separated). Env keys are appended after file-configured keys so
    /// both sources rotate together.
    pub fn apply_env_keys(&mut self) {
        for provider in &mut self.providers {
            let var = format!("OPAL_{}_KEYS", provider.name.to_uppercase());
            if let Ok(raw) = std::env::var(&var) {
                let keys: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect();
                if !keys.is_empty() {
                    info!(
                        provider = %provider.name,
                        count = keys.len(),
                        "Loaded API keys from environment"
                    );
                    provider.api_keys.extend(keys);
                }
            }
        }
    }

    /// Settings for a provider by name, if configured.
    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Basic sanity checks, logged as warnings rather than hard errors so a
    /// partially broken config still starts (degraded service is preferred
    /// over no service).
    pub fn validate(&self) {
        if self.providers.is_empty() {
            warn!("No providers configured; every request will use the instant fallback");
        }
        for provider in &self.providers {
            if provider.api_keys.is_empty() {
                warn!(provider = %provider.name, "Provider has no API keys configured");
            }
        }
        if self.cache_capacity == 0 {
            warn!("Cache capacity is 0; response caching is disabled");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_three_providers_in_order() {
        let config = OpalConfig::default();
        let names: Vec<&str> = config.providers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["anthropic", "openai", "groq"]);
    }

    #[test]
    fn default_thresholds() {
        let config = OpalConfig::default();
        assert_eq!(config.cache_ttl_secs, 300);
        assert!((config.semantic_hit_threshold - 0.92).abs() < f32::EPSILON);
        assert!((config.pattern_override_threshold - 0.85).abs() < f32::EPSILON);
        assert_eq!(config.backoff_base_ms, 1_000);
        assert_eq!(config.backoff_cap_ms, 300_000);
    }

    #[test]
    fn round_trips_through_json() {
        let config = OpalConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: OpalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.providers.len(), config.providers.len());
        assert_eq!(parsed.retry_budget_ms, config.retry_budget_ms);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let parsed: OpalConfig = serde_json::from_str(r#"{"cache_ttl_secs": 60}"#).unwrap();
        assert_eq!(parsed.cache_ttl_secs, 60);
        assert_eq!(parsed.cache_capacity, 256);
        assert_eq!(parsed.providers.len(), 3);
    }

    #[test]
    fn load_from_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"retry_budget_ms": 5000}"#).unwrap();

        let config = OpalConfig::load_from(&path).unwrap();
        assert_eq!(config.retry_budget_ms, 5000);
    }

    #[test]
    fn load_from_rejects_bad_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(OpalConfig::load_from(&path).is_err());
    }

    #[test]
    fn provider_lookup_by_name() {
        let config = OpalConfig::default();
        assert!(config.provider("openai").is_some());
        assert!(config.provider("nonexistent").is_none());
    }

    #[test]
    fn env_keys_are_appended() {
        let mut config = OpalConfig::default();
        config.providers[0].api_keys = vec!["file-key".into()];

        // SAFETY: test-only env mutation; no other threads read this var.
        unsafe { std::env::set_var("OPAL_ANTHROPIC_KEYS", "env-key-1, env-key-2") };
        config.apply_env_keys();
        unsafe { std::env::remove_var("OPAL_ANTHROPIC_KEYS") };

        let keys = &config.provider("anthropic").unwrap().api_keys;
        assert_eq!(keys, &vec![
            "file-key".to_string(),
            "env-key-1".to_string(),
            "env-key-2".to_string()
        ]);
    }
}
