//! Baseline intent classifier.
//!
//! Keyword-weighted scoring over the query text plus recent conversation
//! context. Deterministic for identical input: the keyword tables are static,
//! ties break on a fixed intent order, and there is no randomness anywhere.
//! The trigger ensemble refines (and may override) this baseline.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::types::{Classification, Intent};

/// One weighted cue for an intent.
struct Cue {
    pattern: Regex,
    weight: f32,
}

fn cue(pattern: &str, weight: f32) -> Cue {
    Cue {
        pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("Bad cue pattern `{pattern}`: {e}")),
        weight,
    }
}

/// Keyword cues per intent. Weights are summed per intent and capped at 1.0;
/// the highest-scoring intent wins.
static INTENT_CUES: Lazy<Vec<(Intent, Vec<Cue>)>> = Lazy::new(|| {
    vec![
        (Intent::RealtimeSearch, vec![
            cue(r"(?i)\b(latest|breaking|live|right now|currently|today)\b", 0.4),
            cue(r"(?i)\b(news|headlines|happening)\b", 0.4),
            cue(r"(?i)\bweather\b", 0.6),
        ]),
        (Intent::WebSearch, vec![
            cue(r"(?i)\b(search|look up|google|find)\b", 0.5),
            cue(r"(?i)\b(price|stock|exchange rate|score|results?)\b", 0.4),
        ]),
        (Intent::AppControl, vec![
            cue(r"(?i)\b(open|close|launch|quit|switch to)\b", 0.4),
            cue(r"(?i)\b(app|application|browser|window|tab|volume|brightness)\b", 0.4),
        ]),
        (Intent::ImageGeneration, vec![
            cue(r"(?i)\b(draw|sketch|paint|render)\b", 0.5),
            cue(r"(?i)\b(image|picture|logo|illustration|wallpaper|art)\b", 0.4),
        ]),
        (Intent::Music, vec![
            cue(r"(?i)\b(play|pause|skip|shuffle|queue)\b", 0.4),
            cue(r"(?i)\b(song|music|track|playlist|album|beats?|spotify)\b", 0.5),
        ]),
        (Intent::DocumentQa, vec![
            cue(r"(?i)\b(summarize|summarise)\b", 0.5),
            cue(r"(?i)\b(document|pdf|file|attachment|page)\b", 0.4),
            cue(r"(?i)\baccording to\b", 0.4),
        ]),
        (Intent::CodeExecution, vec![
            cue(r"(?i)\b(run|execute|compile)\b", 0.4),
            cue(r"(?i)\b(code|script|snippet|program|function)\b", 0.4),
            cue(r"```", 0.5),
        ]),
        (Intent::SaasAction, vec![
            cue(r"(?i)\b(trello|notion|slack|figma|jira|github|calendar)\b", 0.6),
            cue(r"(?i)\b(ticket|card|issue|meeting|standup|pull request)\b", 0.3),
        ]),
    ]
});

/// Confidence floor for the default intent when no cue matches.
const DEFAULT_CONFIDENCE: f32 = 0.3;

/// Baseline intent classifier. Zero-sized today; kept as a struct so custom
/// cue tables can be added without changing call sites.
pub struct Classifier {
    _private: (),
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    /// Create a classifier. Forces cue compilation so bad patterns surface at
    /// startup rather than on the first request.
    pub fn new() -> Self {
        let _ = &*INTENT_CUES;
        Self { _private: () }
    }

    /// Classify a query. Empty input yields `general_chat` with confidence
    /// 0.0; this is the only "failure" mode and it never reaches the caller
    /// as an error.
    pub fn classify(&self, text: &str, context: &[String]) -> Classification {
        if text.trim().is_empty() {
            return Classification::new(Intent::GeneralChat, 0.0);
        }

        // Recent context is weighted at half the query text so a follow-up
        // like "and the one before that?" keeps the conversation's intent.
        let mut best: Option<(Intent, f32)> = None;
        for (intent, cues) in INTENT_CUES.iter() {
            let mut score = 0.0f32;
            for c in cues {
                if c.pattern.is_match(text) {
                    score += c.weight;
                } else if context.iter().any(|line| c.pattern.is_match(line)) {
                    score += c.weight * 0.5;
                }
            }
            let score = score.min(1.0);
            // Strict `>` keeps the earlier intent on ties; INTENT_CUES order
            // is fixed, so results are reproducible.
            if score > 0.0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((*intent, score));
            }
        }

        let classification = match best {
            Some((intent, score)) => Classification::new(intent, score),
            None => Classification::new(Intent::GeneralChat, DEFAULT_CONFIDENCE),
        };

        debug!(
            intent = %classification.intent,
            confidence = classification.confidence,
            "Baseline classification"
        );
        classification
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Classification {
        Classifier::new().classify(text, &[])
    }

    #[test]
    fn empty_input_defaults_with_zero_confidence() {
        let c = classify("");
        assert_eq!(c.intent, Intent::GeneralChat);
        assert_eq!(c.confidence, 0.0);

        let c = classify("   \t ");
        assert_eq!(c.intent, Intent::GeneralChat);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn unmatched_text_is_general_chat() {
        let c = classify("tell me something interesting about yourself");
        assert_eq!(c.intent, Intent::GeneralChat);
        assert!(c.confidence > 0.0);
    }

    #[test]
    fn music_keywords_detected() {
        let c = classify("play my workout playlist");
        assert_eq!(c.intent, Intent::Music);
        assert!(c.confidence >= 0.8);
    }

    #[test]
    fn weather_is_realtime_search() {
        let c = classify("what's the weather like today");
        assert_eq!(c.intent, Intent::RealtimeSearch);
    }

    #[test]
    fn saas_keywords_detected() {
        let c = classify("create a trello card for the release");
        assert_eq!(c.intent, Intent::SaasAction);
    }

    #[test]
    fn code_block_is_code_execution() {
        let c = classify("run this:\n```python\nprint(1)\n```");
        assert_eq!(c.intent, Intent::CodeExecution);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = Classifier::new();
        let context = vec!["play something upbeat".to_string()];
        let a = classifier.classify("what about jazz?", &context);
        for _ in 0..10 {
            let b = classifier.classify("what about jazz?", &context);
            assert_eq!(a.intent, b.intent);
            assert_eq!(a.confidence, b.confidence);
        }
    }

    #[test]
    fn context_influences_at_half_weight() {
        let classifier = Classifier::new();
        let bare = classifier.classify("the next one please", &[]);
        let with_context = classifier.classify("the next one please", &[
            "play my focus playlist".to_string(),
        ]);
        assert_eq!(bare.intent, Intent::GeneralChat);
        assert_eq!(with_context.intent, Intent::Music);
        // Context votes count half, so confidence stays below a direct match.
        let direct = classifier.classify("play my focus playlist", &[]);
        assert!(with_context.confidence < direct.confidence);
    }
}
