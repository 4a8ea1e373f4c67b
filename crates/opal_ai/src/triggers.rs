//! Trigger ensemble.
//!
//! Refines the baseline classification with two independent signals: an
//! ordered set of regex trigger rules (specific before generic) and cosine
//! similarity against per-intent exemplar embeddings. Pattern rules are
//! brittle to phrasing and exemplar similarity is brittle to short queries;
//! combining them keeps precision without giving up recall on novel phrasings.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::embedding::{cosine, embed};
use crate::types::{Classification, Intent};

// ---------------------------------------------------------------------------
// Pattern rules
// ---------------------------------------------------------------------------

/// A single trigger rule bound to one intent.
struct TriggerRule {
    name: &'static str,
    intent: Intent,
    pattern: Regex,
}

fn rule(name: &'static str, intent: Intent, pattern: &str) -> TriggerRule {
    TriggerRule {
        name,
        intent,
        pattern: Regex::new(pattern)
            .unwrap_or_else(|e| panic!("Bad trigger pattern `{pattern}`: {e}")),
    }
}

/// Trigger rules in priority order.
///
/// ORDER MATTERS: specific phrasings must come before generic ones so
/// "play lofi on spotify" hits the spotify rule before the bare "play" rule.
static TRIGGER_RULES: Lazy<Vec<TriggerRule>> = Lazy::new(|| {
    vec![
        // --- Specific, high-signal rules ---
        rule(
            "play_on_spotify",
            Intent::Music,
            r"(?i)\bplay\b.+\bon spotify\b",
        ),
        rule(
            "play_media",
            Intent::Music,
            r"(?i)\bplay\b.*\b(music|song|track|playlist|album|beats?|lofi|podcast)\b",
        ),
        rule(
            "generate_image",
            Intent::ImageGeneration,
            r"(?i)\b(draw|generate|create|make|render)\b.*\b(image|picture|logo|illustration|wallpaper|art)\b",
        ),
        rule(
            "run_code",
            Intent::CodeExecution,
            r"(?i)\b(run|execute|compile)\b.*\b(code|script|snippet|program)\b",
        ),
        rule(
            "document_question",
            Intent::DocumentQa,
            r"(?i)\b(summarize|summarise)\b.*\b(document|pdf|file|attachment)\b|\baccording to (this|the) (document|pdf|file)\b",
        ),
        rule(
            "saas_item",
            Intent::SaasAction,
            r"(?i)\b(create|add|move|assign|schedule)\b.*\b(ticket|card|issue|task|event|meeting)\b.*\b(trello|jira|notion|github|calendar|slack)\b",
        ),
        rule(
            "saas_tool",
            Intent::SaasAction,
            r"(?i)\b(trello|notion|slack|figma|jira)\b",
        ),
        rule(
            "app_command",
            Intent::AppControl,
            r"(?i)\b(open|close|launch|quit)\b.*\b(app|application|browser|window|tab)\b",
        ),
        rule(
            "breaking_news",
            Intent::RealtimeSearch,
            r"(?i)\b(latest|breaking|today'?s)\b.*\b(news|headlines)\b",
        ),
        rule("weather_now", Intent::RealtimeSearch, r"(?i)\bweather\b"),
        rule(
            "asset_price",
            Intent::WebSearch,
            r"(?i)\b(price|stock|exchange rate|market cap)\b",
        ),
        rule(
            "explicit_search",
            Intent::WebSearch,
            r"(?i)\bsearch\b.*\b(web|online|internet|for)\b",
        ),
        // --- Generic catch-alls, deliberately last ---
        rule("play_generic", Intent::Music, r"(?i)\bplay\b"),
    ]
});

// ---------------------------------------------------------------------------
// Semantic exemplars
// ---------------------------------------------------------------------------

/// Exemplar phrases per intent; embedded once at startup.
static EXEMPLARS: Lazy<Vec<(Intent, Vec<Vec<f32>>)>> = Lazy::new(|| {
    let phrases: &[(Intent, &[&str])] = &[
        (Intent::RealtimeSearch, &[
            "what is happening in the world right now",
            "latest news headlines this morning",
            "current weather forecast for today",
        ]),
        (Intent::WebSearch, &[
            "search the web for the best laptop under 1000",
            "what is the current bitcoin price",
            "look up the match score online",
        ]),
        (Intent::AppControl, &[
            "open the browser and go to my mail",
            "close all application windows",
            "launch the music app",
        ]),
        (Intent::ImageGeneration, &[
            "generate an image of a mountain at sunset",
            "draw a cartoon logo for my startup",
            "create a wallpaper with abstract art",
        ]),
        (Intent::Music, &[
            "play some relaxing music",
            "put on my favorite playlist",
            "play the new album by that band",
        ]),
        (Intent::DocumentQa, &[
            "summarize this document for me",
            "what does the attached pdf say about payments",
            "answer questions about this file",
        ]),
        (Intent::CodeExecution, &[
            "run this python script and show the output",
            "execute the code snippet below",
            "compile and run this program",
        ]),
        (Intent::SaasAction, &[
            "create a card on my trello board",
            "post a message to the team slack channel",
            "add a meeting to my calendar for friday",
        ]),
    ];

    phrases
        .iter()
        .map(|(intent, list)| (*intent, list.iter().map(|p| embed(p)).collect()))
        .collect()
});

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Thresholds for combining the two signals. Defaults come from observed
/// behavior; all four are tunable via [`opal_core::OpalConfig`].
#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    /// Confidence assigned to a matching pattern rule.
    pub pattern_vote: f32,
    /// A pattern rule that disagrees with the semantic signal only wins
    /// above this score.
    pub pattern_override_threshold: f32,
    /// Minimum exemplar similarity for the semantic signal to vote at all.
    pub semantic_vote_threshold: f32,
    /// Margin by which similarity must beat the classifier's confidence to
    /// override its intent.
    pub semantic_margin: f32,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            pattern_vote: 0.9,
            pattern_override_threshold: 0.85,
            semantic_vote_threshold: 0.6,
            semantic_margin: 0.15,
        }
    }
}

impl EnsembleConfig {
    pub fn from_config(config: &opal_core::OpalConfig) -> Self {
        Self {
            pattern_vote: config.pattern_vote,
            pattern_override_threshold: config.pattern_override_threshold,
            semantic_vote_threshold: config.semantic_vote_threshold,
            semantic_margin: config.semantic_margin,
        }
    }
}

// ---------------------------------------------------------------------------
// TriggerEnsemble
// ---------------------------------------------------------------------------

struct PatternSignal {
    intent: Intent,
    rule_name: &'static str,
    vote: f32,
}

struct SemanticSignal {
    intent: Intent,
    similarity: f32,
}

/// Combines pattern rules and exemplar similarity to refine a baseline
/// classification.
pub struct TriggerEnsemble {
    config: EnsembleConfig,
}

impl Default for TriggerEnsemble {
    fn default() -> Self {
        Self::new(EnsembleConfig::default())
    }
}

impl TriggerEnsemble {
    /// Create an ensemble. Forces rule and exemplar initialization so bad
    /// patterns surface at startup.
    pub fn new(config: EnsembleConfig) -> Self {
        let _ = &*TRIGGER_RULES;
        let _ = &*EXEMPLARS;
        Self { config }
    }

    /// Refine a baseline classification. Deterministic: both signals are
    /// pure functions of `text`.
    pub fn refine(&self, text: &str, base: &Classification) -> Classification {
        if text.trim().is_empty() {
            return base.clone();
        }

        let pattern = self.pattern_signal(text);
        let semantic = self.semantic_signal(text);

        let refined = match (pattern, semantic) {
            // Signals agree: take the most confident of all three votes.
            (Some(p), Some(s)) if p.intent == s.intent => Classification {
                intent: p.intent,
                confidence: base.confidence.max(p.vote).max(s.similarity),
                matched_rule: Some(p.rule_name.to_string()),
                matched_exemplar_similarity: Some(s.similarity),
            },

            // Signals disagree: a strong pattern wins outright; otherwise the
            // semantic vote may override the classifier; otherwise keep it.
            (Some(p), Some(s)) => {
                if p.vote > self.config.pattern_override_threshold {
                    Classification {
                        intent: p.intent,
                        confidence: p.vote,
                        matched_rule: Some(p.rule_name.to_string()),
                        matched_exemplar_similarity: None,
                    }
                } else if s.similarity > base.confidence + self.config.semantic_margin {
                    Classification {
                        intent: s.intent,
                        confidence: s.similarity,
                        matched_rule: None,
                        matched_exemplar_similarity: Some(s.similarity),
                    }
                } else {
                    base.clone()
                }
            }

            // Pattern only.
            (Some(p), None) => {
                if p.intent == base.intent {
                    Classification {
                        intent: p.intent,
                        confidence: base.confidence.max(p.vote),
                        matched_rule: Some(p.rule_name.to_string()),
                        matched_exemplar_similarity: None,
                    }
                } else if p.vote > self.config.pattern_override_threshold {
                    Classification {
                        intent: p.intent,
                        confidence: p.vote,
                        matched_rule: Some(p.rule_name.to_string()),
                        matched_exemplar_similarity: None,
                    }
                } else {
                    base.clone()
                }
            }

            // Semantic only.
            (None, Some(s)) => {
                if s.intent == base.intent {
                    Classification {
                        intent: s.intent,
                        confidence: base.confidence.max(s.similarity),
                        matched_rule: None,
                        matched_exemplar_similarity: Some(s.similarity),
                    }
                } else if s.similarity > base.confidence + self.config.semantic_margin {
                    Classification {
                        intent: s.intent,
                        confidence: s.similarity,
                        matched_rule: None,
                        matched_exemplar_similarity: Some(s.similarity),
                    }
                } else {
                    base.clone()
                }
            }

            (None, None) => base.clone(),
        };

        if refined.intent != base.intent {
            debug!(
                from = %base.intent,
                to = %refined.intent,
                rule = refined.matched_rule.as_deref().unwrap_or("-"),
                "Ensemble overrode baseline intent"
            );
        }
        refined
    }

    /// First matching rule in priority order.
    fn pattern_signal(&self, text: &str) -> Option<PatternSignal> {
        TRIGGER_RULES
            .iter()
            .find(|r| r.pattern.is_match(text))
            .map(|r| PatternSignal {
                intent: r.intent,
                rule_name: r.name,
                vote: self.config.pattern_vote,
            })
    }

    /// Highest exemplar similarity at or above the vote threshold.
    fn semantic_signal(&self, text: &str) -> Option<SemanticSignal> {
        let query = embed(text);
        let mut best: Option<SemanticSignal> = None;
        for (intent, exemplars) in EXEMPLARS.iter() {
            for exemplar in exemplars {
                let similarity = cosine(&query, exemplar);
                if similarity >= self.config.semantic_vote_threshold
                    && best.as_ref().map_or(true, |b| similarity > b.similarity)
                {
                    best = Some(SemanticSignal {
                        intent: *intent,
                        similarity,
                    });
                }
            }
        }
        best
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
