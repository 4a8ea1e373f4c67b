pub mod cache;
pub mod chain;
pub mod classifier;
pub mod complexity;
pub mod embedding;
pub mod keypool;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod triggers;
pub mod types;

// Re-export core types at crate root for convenience.
pub use cache::{CacheConfig, CachedPayload, ResponseCache, fingerprint};
pub use chain::{
    Attempt, AttemptOutcome, ChainConfig, ChainOutcome, FALLBACK_PROVIDER_LABEL, FallbackChain,
    INSTANT_FALLBACK_TEXT,
};
pub use classifier::Classifier;
pub use complexity::{ComplexityAssessor, QueryComplexity};
pub use keypool::{Exhausted, KeyLease, KeyPool, KeyPoolConfig, SlotStatus};
pub use orchestrator::{DELEGATE_PROVIDER_LABEL, IntentDelegate, Orchestrator, RequestRecord};
pub use providers::{ChatProvider, ProviderError};
pub use registry::{ProviderDescriptor, ProviderRegistry};
pub use triggers::{EnsembleConfig, TriggerEnsemble};
pub use types::*;
