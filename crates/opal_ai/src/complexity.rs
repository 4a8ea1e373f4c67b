//! Query-complexity heuristic.
//!
//! Maps a query to one of two tiers: `Low` routes to each provider's fast
//! model, `High` to its strong model. Coarse by design: token count plus a
//! few regex marker groups, no model calls.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Query;

/// The two model tiers the registry knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryComplexity {
    Low,
    High,
}

fn compile_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("Bad regex pattern `{p}`: {e}")))
        .collect()
}

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

/// Multi-step work markers.
static MULTI_STEP: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_patterns(&[
        r"(?i)\bstep by step\b",
        r"(?i)\bfirst\b.*\bthen\b",
        r"(?i)\b(plan|outline|workflow|multi-?step)\b",
        r"(?i)\b(and then|after that|followed by)\b",
    ])
});

/// Code markers.
static CODE_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_patterns(&[
        r"```",
        r"(?i)\b(implement|refactor|debug|compile)\b",
        r"(?i)\b(function|class|struct|trait|regex|sql)\b",
        r"(?i)\bstack trace\b",
    ])
});

/// Deep-reasoning markers.
static REASONING_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_patterns(&[
        r"(?i)\bwhy\b",
        r"(?i)\b(prove|derive|analyze|analyse)\b",
        r"(?i)\b(compare|trade-?offs?|pros and cons)\b",
        r"(?i)\bexplain .*\breasoning\b",
    ])
});

/// Token count above which a query is high-complexity regardless of markers.
const TOKEN_THRESHOLD: u32 = 400;

/// Assesses query complexity. Zero-sized; a struct so thresholds can become
/// configurable later without changing call sites.
pub struct ComplexityAssessor {
    _private: (),
}

impl Default for ComplexityAssessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ComplexityAssessor {
    pub fn new() -> Self {
        let _ = &*MULTI_STEP;
        let _ = &*CODE_MARKERS;
        let _ = &*REASONING_MARKERS;
        Self { _private: () }
    }

    /// Assess a query. Context length counts toward the token estimate since
    /// it is sent upstream with the prompt.
    pub fn assess(&self, query: &Query) -> QueryComplexity {
        let total_chars: usize = query.text.len()
            + query
                .conversation_context
                .iter()
                .map(|line| line.len())
                .sum::<usize>();
        // Rough estimate: ~4 characters per token.
        let tokens = (total_chars / 4).max(1) as u32;

        if tokens > TOKEN_THRESHOLD {
            return QueryComplexity::High;
        }

        let mut marker_groups = 0;
        if any_match(&MULTI_STEP, &query.text) {
            marker_groups += 1;
        }
        if any_match(&CODE_MARKERS, &query.text) {
            marker_groups += 1;
        }
        if any_match(&REASONING_MARKERS, &query.text) {
            marker_groups += 1;
        }

        // A code block alone is enough; otherwise two marker groups are.
        if query.text.contains("```") || marker_groups >= 2 {
            QueryComplexity::High
        } else {
            QueryComplexity::Low
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn assess(text: &str) -> QueryComplexity {
        ComplexityAssessor::new().assess(&Query::new(text, "u1"))
    }

    #[test]
    fn short_question_is_low() {
        assert_eq!(assess("what's the capital of france"), QueryComplexity::Low);
    }

    #[test]
    fn code_block_is_high() {
        assert_eq!(
            assess("fix this:\n```rust\nfn main() {}\n```"),
            QueryComplexity::High
        );
    }

    #[test]
    fn multi_step_reasoning_is_high() {
        assert_eq!(
            assess("explain step by step why this approach beats the alternative, compare trade-offs"),
            QueryComplexity::High
        );
    }

    #[test]
    fn single_marker_group_stays_low() {
        assert_eq!(assess("why is the sky blue"), QueryComplexity::Low);
    }

    #[test]
    fn long_input_is_high() {
        let long = "word ".repeat(500);
        assert_eq!(assess(&long), QueryComplexity::High);
    }

    #[test]
    fn context_counts_toward_tokens() {
        let assessor = ComplexityAssessor::new();
        let query = Query::new("continue", "u1")
            .with_context(vec!["line ".repeat(400); 2]);
        assert_eq!(assessor.assess(&query), QueryComplexity::High);
    }
}
