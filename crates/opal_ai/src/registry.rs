//! Provider registry.
//!
//! Static description of the configured providers, their fast/strong model
//! variants, and their priority order. Read-only after construction; the
//! fallback chain consumes its candidate lists at request time.

use opal_core::OpalConfig;
use tracing::warn;

use crate::complexity::QueryComplexity;
use crate::types::{Candidate, Intent, ProviderId};

/// One configured provider with its tier models.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub fast_model: String,
    pub strong_model: String,
    /// Lower rank is tried first.
    pub priority_rank: u32,
}

/// Static, process-wide provider table.
pub struct ProviderRegistry {
    descriptors: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    /// Build from explicit descriptors (tests, embedding).
    pub fn new(mut descriptors: Vec<ProviderDescriptor>) -> Self {
        descriptors.sort_by_key(|d| d.priority_rank);
        Self { descriptors }
    }

    /// Build from configuration. Unknown provider names are skipped with a
    /// warning so one typo does not take the whole router down.
    pub fn from_config(config: &OpalConfig) -> Self {
        let mut descriptors = Vec::new();
        for (rank, settings) in config.providers.iter().enumerate() {
            let Some(id) = ProviderId::from_name(&settings.name) else {
                warn!(name = %settings.name, "Unknown provider in config, skipping");
                continue;
            };
            descriptors.push(ProviderDescriptor {
                id,
                fast_model: settings.fast_model.clone(),
                strong_model: settings.strong_model.clone(),
                priority_rank: rank as u32,
            });
        }
        Self::new(descriptors)
    }

    /// Ordered candidate list for a query: every provider in priority order,
    /// each paired with the tier-appropriate model.
    ///
    /// Confidence and intent influence the tier, not the order: document
    /// answering and code work always get the strong model, everything else
    /// follows the complexity heuristic.
    pub fn candidates_for(&self, intent: Intent, complexity: QueryComplexity) -> Vec<Candidate> {
        let strong = complexity == QueryComplexity::High
            || matches!(intent, Intent::DocumentQa | Intent::CodeExecution);

        self.descriptors
            .iter()
            .map(|d| Candidate {
                provider: d.id,
                model: if strong {
                    d.strong_model.clone()
                } else {
                    d.fast_model.clone()
                },
            })
            .collect()
    }

    /// All descriptors in priority order.
    pub fn descriptors(&self) -> &[ProviderDescriptor] {
        &self.descriptors
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
