//! Request orchestrator.
//!
//! Drives a query through the pipeline: classify, refine, check the cache,
//! route through the fallback chain (or hand off to the automation delegate),
//! store, respond. Every request produces a response; failure modes degrade
//! to the instant fallback instead of surfacing errors. Each request leaves a
//! trace record behind for diagnostics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opal_core::OpalConfig;
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{CacheConfig, CachedPayload, ResponseCache, fingerprint};
use crate::chain::{ChainConfig, FALLBACK_PROVIDER_LABEL, FallbackChain, INSTANT_FALLBACK_TEXT};
use crate::classifier::Classifier;
use crate::complexity::ComplexityAssessor;
use crate::keypool::{KeyPool, KeyPoolConfig};
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::openai_compat::OpenAiCompatProvider;
use crate::providers::ChatProvider;
use crate::registry::ProviderRegistry;
use crate::triggers::{EnsembleConfig, TriggerEnsemble};
use crate::types::{Classification, Intent, ProviderId, Query, ResponseKind, RouteResponse};

/// `provider_used` label for delegated intents.
pub const DELEGATE_PROVIDER_LABEL: &str = "automation";

const RECORD_CAP: usize = 1000;
const RECORD_KEEP: usize = 500;

// ---------------------------------------------------------------------------
// Delegate
// ---------------------------------------------------------------------------

/// Handler for intents resolved outside the language-model path (app control,
/// SaaS actions). The orchestrator treats the returned content as opaque.
#[async_trait]
pub trait IntentDelegate: Send + Sync {
    async fn dispatch(&self, query: &Query, intent: Intent) -> anyhow::Result<String>;
}

// ---------------------------------------------------------------------------
// Request records
// ---------------------------------------------------------------------------

/// Per-request diagnostics: the pipeline stages the request passed through
/// and what came out the other end.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub intent: Intent,
    pub confidence: f32,
    pub cached: bool,
    pub provider_used: String,
    pub attempt_count: usize,
    /// Pipeline stages in order, e.g. `received` .. `respond`.
    pub stages: Vec<&'static str>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// The routing pipeline. Components are wired once at construction and
/// shared across requests; all per-request state lives on the stack.
pub struct Orchestrator {
    classifier: Classifier,
    ensemble: TriggerEnsemble,
    assessor: ComplexityAssessor,
    registry: ProviderRegistry,
    cache: ResponseCache,
    chain: FallbackChain,
    keys: Arc<KeyPool>,
    retry_budget: Duration,
    delegate: Option<Arc<dyn IntentDelegate>>,
    records: Mutex<Vec<RequestRecord>>,
}

impl Orchestrator {
    /// Wire the pipeline from configuration and explicit provider clients.
    pub fn new(config: &OpalConfig, providers: HashMap<ProviderId, Arc<dyn ChatProvider>>) -> Self {
        let keys = Arc::new(KeyPool::new(KeyPoolConfig {
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
        }));
        for settings in &config.providers {
            if let Some(id) = ProviderId::from_name(&settings.name)
                && !settings.api_keys.is_empty()
            {
                keys.register(id, settings.api_keys.clone());
            }
        }

        let chain = FallbackChain::new(providers, Arc::clone(&keys), ChainConfig::from_config(config));

        Self {
            classifier: Classifier::new(),
            ensemble: TriggerEnsemble::new(EnsembleConfig::from_config(config)),
            assessor: ComplexityAssessor::new(),
            registry: ProviderRegistry::from_config(config),
            cache: ResponseCache::new(CacheConfig::from_config(config)),
            chain,
            keys,
            retry_budget: Duration::from_millis(config.retry_budget_ms),
            delegate: None,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Wire the pipeline with the built-in HTTP clients for every configured
    /// provider.
    pub fn from_config(config: &OpalConfig) -> Self {
        let mut providers: HashMap<ProviderId, Arc<dyn ChatProvider>> = HashMap::new();
        for settings in &config.providers {
            let Some(id) = ProviderId::from_name(&settings.name) else {
                continue;
            };
            let client: Arc<dyn ChatProvider> = match id {
                ProviderId::Anthropic => Arc::new(AnthropicProvider::new(settings.base_url.clone())),
                // Everything else speaks the chat-completions shape.
                _ => Arc::new(OpenAiCompatProvider::new(id, settings.base_url.clone())),
            };
            providers.insert(id, client);
        }
        Self::new(config, providers)
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn IntentDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Handle a query with the default retry budget.
    pub async fn handle(&self, query: &Query) -> RouteResponse {
        self.handle_with_deadline(query, Instant::now() + self.retry_budget)
            .await
    }

    /// Handle a query, finishing by `deadline`. Past the deadline the chain
    /// stops trying providers and the instant fallback answers.
    pub async fn handle_with_deadline(&self, query: &Query, deadline: Instant) -> RouteResponse {
        let id = Uuid::new_v4();
        let mut stages: Vec<&'static str> = vec!["received"];

        let base = self
            .classifier
            .classify(&query.text, &query.conversation_context);
        let classification = self.ensemble.refine(&query.text, &base);
        stages.push("classified");
        info!(
            request = %id,
            intent = %classification.intent,
            confidence = classification.confidence,
            "Query classified"
        );

        let (response, attempt_count) = if classification.intent.is_delegated() {
            stages.push("delegate");
            (self.dispatch(query, classification.intent).await, 0)
        } else {
            self.resolve_chat(query, &classification, deadline, &mut stages)
                .await
        };
        stages.push("respond");

        self.record(RequestRecord {
            id,
            at: Utc::now(),
            intent: classification.intent,
            confidence: classification.confidence,
            cached: response.cached,
            provider_used: response.provider_used.clone(),
            attempt_count,
            stages,
        });
        response
    }

    /// Most recent request records, newest last.
    pub fn recent_records(&self, limit: usize) -> Vec<RequestRecord> {
        let records = self.records.lock();
        let start = records.len().saturating_sub(limit);
        records[start..].to_vec()
    }

    /// The key pool backing the fallback chain.
    pub fn key_pool(&self) -> &KeyPool {
        &self.keys
    }

    async fn dispatch(&self, query: &Query, intent: Intent) -> RouteResponse {
        let Some(delegate) = &self.delegate else {
            warn!(%intent, "No delegate registered for delegated intent");
            return fallback_response(intent);
        };
        match delegate.dispatch(query, intent).await {
            Ok(content) => RouteResponse {
                kind: ResponseKind::Delegated,
                content,
                provider_used: DELEGATE_PROVIDER_LABEL.to_string(),
                cached: false,
                intent,
            },
            Err(err) => {
                warn!(%intent, %err, "Delegate dispatch failed");
                fallback_response(intent)
            }
        }
    }

    async fn resolve_chat(
        &self,
        query: &Query,
        classification: &Classification,
        deadline: Instant,
        stages: &mut Vec<&'static str>,
    ) -> (RouteResponse, usize) {
        let intent = classification.intent;

        stages.push("cache_check");
        if let Some(hit) = self.cache.lookup(query) {
            stages.push("cache_hit");
            return (cached_response(hit, intent), 0);
        }

        // Serialize identical concurrent misses; whoever gets the guard
        // first resolves, the rest hit the fresh entry on re-check.
        let key = fingerprint(query);
        let flight = self.cache.begin_flight(&key).await;
        if flight.is_some()
            && let Some(hit) = self.cache.lookup(query)
        {
            stages.push("cache_hit");
            return (cached_response(hit, intent), 0);
        }

        stages.push("route");
        let complexity = self.assessor.assess(query);
        let candidates = self.registry.candidates_for(intent, complexity);

        stages.push("provider_call");
        let prompt = build_prompt(query);
        let outcome = self.chain.resolve(&candidates, &prompt, deadline).await;
        let attempt_count = outcome.attempts.len();

        if outcome.is_fallback() {
            // Fallback text is never cached; the next identical query should
            // try the providers again.
            return (
                RouteResponse {
                    kind: ResponseKind::Fallback,
                    content: outcome.content,
                    provider_used: FALLBACK_PROVIDER_LABEL.to_string(),
                    cached: false,
                    intent,
                },
                attempt_count,
            );
        }

        let provider_used = outcome.provider_label();
        stages.push("cache_store");
        self.cache.store(
            query,
            CachedPayload {
                content: outcome.content.clone(),
                provider_used: provider_used.clone(),
            },
        );

        (
            RouteResponse {
                kind: ResponseKind::Chat,
                content: outcome.content,
                provider_used,
                cached: false,
                intent,
            },
            attempt_count,
        )
    }

    fn record(&self, record: RequestRecord) {
        let mut records = self.records.lock();
        records.push(record);
        if records.len() > RECORD_CAP {
            let excess = records.len() - RECORD_KEEP;
            records.drain(..excess);
        }
    }
}

fn cached_response(hit: CachedPayload, intent: Intent) -> RouteResponse {
    RouteResponse {
        kind: ResponseKind::Chat,
        content: hit.content,
        provider_used: hit.provider_used,
        cached: true,
        intent,
    }
}

fn fallback_response(intent: Intent) -> RouteResponse {
    RouteResponse {
        kind: ResponseKind::Fallback,
        content: INSTANT_FALLBACK_TEXT.to_string(),
        provider_used: FALLBACK_PROVIDER_LABEL.to_string(),
        cached: false,
        intent,
    }
}

/// Prompt sent upstream: recent context turns, then the query.
fn build_prompt(query: &Query) -> String {
    if query.conversation_context.is_empty() {
        query.text.clone()
    } else {
        format!(
            "{}\n\n{}",
            query.conversation_context.join("\n"),
            query.text
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        id: ProviderId,
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(id: ProviderId, script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                id,
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn id(&self) -> ProviderId {
            self.id
        }

        async fn complete(
            &self,
            _prompt: &str,
            _model: &str,
            _api_key: &str,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .pop_front()
                .unwrap_or(Err(ProviderError::Other("script exhausted".into())))
        }
    }

    struct ScriptedDelegate {
        result: Option<String>,
    }

    #[async_trait]
    impl IntentDelegate for ScriptedDelegate {
        async fn dispatch(&self, _query: &Query, _intent: Intent) -> anyhow::Result<String> {
            self.result
                .clone()
                .ok_or_else(|| anyhow::anyhow!("automation backend offline"))
        }
    }

    fn test_config() -> OpalConfig {
        let mut config = OpalConfig::default();
        for provider in &mut config.providers {
            provider.api_keys = vec![format!("{}-test-key", provider.name)];
        }
        config
    }

    fn orchestrator_with(providers: Vec<Arc<ScriptedProvider>>) -> Orchestrator {
        let map: HashMap<ProviderId, Arc<dyn ChatProvider>> = providers
            .into_iter()
            .map(|p| (p.id(), p as Arc<dyn ChatProvider>))
            .collect();
        Orchestrator::new(&test_config(), map)
    }

    fn scripted_ok(id: ProviderId, content: &str) -> Arc<ScriptedProvider> {
        ScriptedProvider::new(id, vec![Ok(content.into())])
    }

    fn scripted_rate_limited(id: ProviderId) -> Arc<ScriptedProvider> {
        ScriptedProvider::new(id, vec![Err(ProviderError::RateLimited)])
    }

    #[tokio::test]
    async fn bitcoin_price_routes_and_second_ask_is_cached() {
        let anthropic = scripted_ok(ProviderId::Anthropic, "Bitcoin is around $100k.");
        let orchestrator = orchestrator_with(vec![Arc::clone(&anthropic)]);
        let query = Query::new("what is the bitcoin price", "u1");

        let first = orchestrator.handle(&query).await;
        assert_eq!(first.kind, ResponseKind::Chat);
        assert_eq!(first.intent, Intent::WebSearch);
        assert_eq!(first.provider_used, "anthropic");
        assert!(!first.cached);
        assert_eq!(first.content, "Bitcoin is around $100k.");

        let second = orchestrator.handle(&query).await;
        assert!(second.cached);
        assert_eq!(second.content, first.content);
        assert_eq!(second.provider_used, "anthropic");
        // Only the first request reached the provider.
        assert_eq!(anthropic.call_count(), 1);
    }

    #[tokio::test]
    async fn play_lofi_beats_is_music_and_goes_through_the_chain() {
        let anthropic = scripted_ok(ProviderId::Anthropic, "Here are some lofi picks.");
        let orchestrator = orchestrator_with(vec![anthropic]);

        let response = orchestrator
            .handle(&Query::new("play lofi beats", "u1"))
            .await;
        assert_eq!(response.intent, Intent::Music);
        assert_eq!(response.kind, ResponseKind::Chat);
    }

    #[tokio::test]
    async fn tertiary_provider_succeeds_when_first_two_are_limited() {
        let anthropic = scripted_rate_limited(ProviderId::Anthropic);
        let openai = scripted_rate_limited(ProviderId::OpenAi);
        let groq = scripted_ok(ProviderId::Groq, "answer from the third provider");
        let orchestrator = orchestrator_with(vec![anthropic, openai, groq]);

        let response = orchestrator
            .handle(&Query::new("tell me a joke about databases", "u1"))
            .await;
        assert_eq!(response.kind, ResponseKind::Chat);
        assert_eq!(response.provider_used, "groq");
        assert!(!response.cached);

        let record = orchestrator.recent_records(1).pop().unwrap();
        assert_eq!(record.attempt_count, 3);
        // Both failed slots are cooling.
        assert_eq!(orchestrator.key_pool().available_count(ProviderId::Anthropic), 0);
        assert_eq!(orchestrator.key_pool().available_count(ProviderId::OpenAi), 0);
        assert_eq!(orchestrator.key_pool().available_count(ProviderId::Groq), 1);
    }

    #[tokio::test]
    async fn exhaustion_answers_instantly_and_is_never_cached() {
        let orchestrator = orchestrator_with(vec![
            scripted_rate_limited(ProviderId::Anthropic),
            scripted_rate_limited(ProviderId::OpenAi),
            scripted_rate_limited(ProviderId::Groq),
        ]);
        let query = Query::new("tell me something nice", "u1");

        let first = orchestrator.handle(&query).await;
        assert_eq!(first.kind, ResponseKind::Fallback);
        assert_eq!(first.content, INSTANT_FALLBACK_TEXT);
        assert_eq!(first.provider_used, FALLBACK_PROVIDER_LABEL);
        assert!(!first.cached);

        // The fallback was not cached: the retry goes back to the chain
        // (and falls back again since every key is cooling).
        let second = orchestrator.handle(&query).await;
        assert_eq!(second.kind, ResponseKind::Fallback);
        assert!(!second.cached);
    }

    #[tokio::test]
    async fn delegated_intent_goes_to_automation() {
        let anthropic = scripted_ok(ProviderId::Anthropic, "unused");
        let orchestrator = orchestrator_with(vec![Arc::clone(&anthropic)]).with_delegate(Arc::new(
            ScriptedDelegate {
                result: Some("browser opened".into()),
            },
        ));

        let response = orchestrator
            .handle(&Query::new("open the browser app", "u1"))
            .await;
        assert_eq!(response.kind, ResponseKind::Delegated);
        assert_eq!(response.intent, Intent::AppControl);
        assert_eq!(response.provider_used, DELEGATE_PROVIDER_LABEL);
        assert!(!response.cached);
        // Delegated intents never touch the model providers.
        assert_eq!(anthropic.call_count(), 0);
    }

    #[tokio::test]
    async fn delegate_failure_degrades_to_fallback() {
        let orchestrator = orchestrator_with(vec![scripted_ok(ProviderId::Anthropic, "unused")])
            .with_delegate(Arc::new(ScriptedDelegate { result: None }));

        let response = orchestrator
            .handle(&Query::new("open the browser app", "u1"))
            .await;
        assert_eq!(response.kind, ResponseKind::Fallback);
        assert_eq!(response.content, INSTANT_FALLBACK_TEXT);
    }

    #[tokio::test]
    async fn missing_delegate_degrades_to_fallback() {
        let orchestrator = orchestrator_with(vec![scripted_ok(ProviderId::Anthropic, "unused")]);
        let response = orchestrator
            .handle(&Query::new("open the browser app", "u1"))
            .await;
        assert_eq!(response.kind, ResponseKind::Fallback);
    }

    #[tokio::test]
    async fn expired_deadline_falls_back_without_provider_calls() {
        let anthropic = scripted_ok(ProviderId::Anthropic, "unused");
        let orchestrator = orchestrator_with(vec![Arc::clone(&anthropic)]);

        let response = orchestrator
            .handle_with_deadline(
                &Query::new("anything at all", "u1"),
                Instant::now() - Duration::from_millis(1),
            )
            .await;
        assert_eq!(response.kind, ResponseKind::Fallback);
        assert_eq!(anthropic.call_count(), 0);
    }

    #[tokio::test]
    async fn records_trace_the_pipeline_stages() {
        let orchestrator = orchestrator_with(vec![scripted_ok(ProviderId::Anthropic, "hi")]);
        orchestrator.handle(&Query::new("hello there", "u1")).await;

        let record = orchestrator.recent_records(1).pop().unwrap();
        assert_eq!(record.stages, vec![
            "received",
            "classified",
            "cache_check",
            "route",
            "provider_call",
            "cache_store",
            "respond",
        ]);
        assert_eq!(record.intent, Intent::GeneralChat);
        assert!(!record.cached);

        orchestrator.handle(&Query::new("hello there", "u1")).await;
        let record = orchestrator.recent_records(1).pop().unwrap();
        assert!(record.cached);
        assert!(record.stages.contains(&"cache_hit"));
        assert!(!record.stages.contains(&"provider_call"));
    }

    #[tokio::test]
    async fn classification_is_stable_across_repeats() {
        let orchestrator = orchestrator_with(vec![ScriptedProvider::new(
            ProviderId::Anthropic,
            (0..5).map(|_| Ok("ok".into())).collect(),
        )]);

        // Different user each time so the text, not the requester, drives
        // the classification.
        for user in ["u1", "u2", "u3"] {
            orchestrator
                .handle(&Query::new("generate an image of a fox", user))
                .await;
        }
        let records = orchestrator.recent_records(10);
        assert!(records
            .iter()
            .all(|r| r.intent == Intent::ImageGeneration));
    }

    #[tokio::test]
    async fn empty_query_still_gets_a_chat_response() {
        let orchestrator = orchestrator_with(vec![scripted_ok(ProviderId::Anthropic, "hello!")]);
        let response = orchestrator.handle(&Query::new("", "u1")).await;
        assert_eq!(response.kind, ResponseKind::Chat);
        assert_eq!(response.intent, Intent::GeneralChat);
    }
}
