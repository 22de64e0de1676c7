//! Intent classification for queries.
//!
//! This module implements the `IntentClassifier` which tags query text with
//! a [`QueryIntent`] using keyword rules evaluated in a fixed order. The first
//! rule with a whole-word match wins; when nothing matches the default intent
//! (Explore) is returned.
//!
//! Matching is case-insensitive and ignores punctuation, so "vs." matches the
//! `vs` keyword but "error" does not match inside "terror".

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::QueryIntent;

/// Result of intent classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// The classified intent
    pub intent: QueryIntent,

    /// Confidence score (0.0-1.0)
    pub confidence: f32,

    /// Explanation of why this intent was chosen
    pub reason: String,

    /// Keywords of the winning rule found in the query
    pub matched_keywords: Vec<String>,
}

/// A keyword rule for one intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRule {
    pub intent: QueryIntent,

    /// Words or phrases; each must appear as whole words
    pub keywords: Vec<String>,
}

impl IntentRule {
    pub fn new(intent: QueryIntent, keywords: &[&str]) -> Self {
        Self {
            intent,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Configuration for intent classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Rules in evaluation order; earlier rules take precedence
    pub rules: Vec<IntentRule>,

    /// Intent when no rule matches
    pub default_intent: QueryIntent,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                IntentRule::new(
                    QueryIntent::Debug,
                    &[
                        "error",
                        "errors",
                        "bug",
                        "bugs",
                        "debug",
                        "debugging",
                        "crash",
                        "crashes",
                        "exception",
                        "stack trace",
                        "traceback",
                        "panic",
                        "fail",
                        "fails",
                        "failing",
                        "failed",
                        "failure",
                        "broken",
                        "not working",
                        "doesn't work",
                    ],
                ),
                IntentRule::new(
                    QueryIntent::Compare,
                    &[
                        "vs",
                        "versus",
                        "compare",
                        "comparison",
                        "difference between",
                        "differences between",
                        "better than",
                        "which is better",
                        "pros and cons",
                        "tradeoffs",
                        "trade-offs",
                    ],
                ),
                IntentRule::new(
                    QueryIntent::Configure,
                    &[
                        "configure",
                        "configuration",
                        "config",
                        "setup",
                        "set up",
                        "install",
                        "installation",
                        "settings",
                        "enable",
                        "disable",
                        "environment variable",
                    ],
                ),
                IntentRule::new(
                    QueryIntent::HowTo,
                    &[
                        "how to",
                        "how do",
                        "how can",
                        "how should",
                        "steps to",
                        "guide",
                        "tutorial",
                        "walkthrough",
                        "best way to",
                    ],
                ),
                IntentRule::new(
                    QueryIntent::Lookup,
                    &[
                        "what is",
                        "what are",
                        "what's",
                        "define",
                        "definition",
                        "meaning of",
                        "where is",
                        "find",
                        "list",
                        "show me",
                        "look up",
                        "lookup",
                    ],
                ),
            ],
            default_intent: QueryIntent::Explore,
        }
    }
}

/// Intent classifier using ordered keyword rules.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    config: ClassifierConfig,
    /// Normalized, space-padded keywords per rule
    rules: Vec<(QueryIntent, Vec<String>)>,
}

impl IntentClassifier {
    /// Create a new classifier with default configuration.
    pub fn new() -> Self {
        Self::with_config(ClassifierConfig::default())
    }

    /// Create a classifier with custom configuration.
    pub fn with_config(config: ClassifierConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                let keywords = rule
                    .keywords
                    .iter()
                    .map(|k| pad(&normalize(k)))
                    .filter(|k| !k.trim().is_empty())
                    .collect();
                (rule.intent, keywords)
            })
            .collect();

        Self { config, rules }
    }

    /// Classify the intent of a query.
    pub fn classify(&self, query: &str) -> ClassificationResult {
        let haystack = pad(&normalize(query));

        for (intent, keywords) in &self.rules {
            let matches: Vec<String> = keywords
                .iter()
                .filter(|k| haystack.contains(k.as_str()))
                .map(|k| k.trim().to_string())
                .collect();

            if !matches.is_empty() {
                let confidence = calculate_score(&matches);
                debug!(
                    query = query,
                    intent = %intent,
                    confidence = confidence,
                    "Intent classified"
                );
                return ClassificationResult {
                    intent: *intent,
                    confidence,
                    reason: format!("{} intent: matched keywords [{}]", intent, matches.join(", ")),
                    matched_keywords: matches,
                };
            }
        }

        debug!(query = query, "No intent rule matched");
        ClassificationResult {
            intent: self.config.default_intent,
            confidence: 0.5,
            reason: format!(
                "No intent rule matched; defaulting to {}",
                self.config.default_intent
            ),
            matched_keywords: vec![],
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn calculate_score(matches: &[String]) -> f32 {
    // Base score from number of matches
    let base = 0.6 + (matches.len() as f32).min(3.0) * 0.1;

    // Multi-word phrases are more specific than single words
    let specificity_bonus: f32 = matches
        .iter()
        .map(|k| if k.contains(' ') { 0.05 } else { 0.0 })
        .sum();

    (base + specificity_bonus).min(1.0)
}

/// Lowercase, turn punctuation into spaces and collapse whitespace.
/// Apostrophes survive so contractions stay one word.
fn normalize(text: &str) -> String {
    let mapped: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn pad(text: &str) -> String {
    format!(" {} ", text)
}
