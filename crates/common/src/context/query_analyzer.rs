//! Query Analyzer - entity mentions and implicit intent
//!
//! Provides:
//! - Entity extraction (quoted phrases, known-entity vocabulary, capitalized runs)
//! - Intent tagging (safety, dependency, procedural, definition)

use crate::evidence::normalize_entity;
use crate::text::is_stop_word;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

fn quoted_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"["“”]([^"“”]{2,})["“”]"#).expect("static quote pattern")
    })
}

/// What the engine knows about a question before retrieval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryDescriptor {
    /// Question as received
    pub original_text: String,

    /// Lowercased, whitespace-collapsed question
    pub normalized_text: String,

    /// Entity mentions, first occurrence order, unique by normalized name
    pub entities: Vec<String>,

    pub intents: Vec<IntentTag>,
}

impl QueryDescriptor {
    pub fn has_intent(&self, tag: IntentTag) -> bool {
        self.intents.contains(&tag)
    }
}

/// Implicit intent qualifiers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntentTag {
    /// Constraints, dangers, conflicts
    Safety,
    /// Prerequisites and requirements
    Dependency,
    /// How-to, steps
    Procedural,
    /// "What is X"
    Definition,
}

const SAFETY_TERMS: &[&str] = &[
    "safe", "safety", "safely", "danger", "dangerous", "hazard", "warning", "caution",
    "risk", "conflict", "conflicts", "damage", "avoid", "never", "allowed", "prohibited",
    "must not", "while", "during",
];

const DEPENDENCY_TERMS: &[&str] = &[
    "require", "requires", "required", "requirement", "depend", "depends", "dependency",
    "prerequisite", "need", "needs", "before",
];

const PROCEDURAL_TERMS: &[&str] = &[
    "how to", "how do", "how can", "steps", "step by step", "procedure", "configure",
    "install", "perform", "set up", "setup",
];

const DEFINITION_PREFIXES: &[&str] = &["what is", "what are", "what's", "define", "meaning of"];

/// Query analyzer; holds the store's entity vocabulary
#[derive(Debug, Clone, Default)]
pub struct QueryAnalyzer {
    /// (normalized, display) pairs
    vocabulary: Vec<(String, String)>,
}

impl QueryAnalyzer {
    pub fn new(known_entities: impl IntoIterator<Item = String>) -> Self {
        let mut seen = HashSet::new();
        let vocabulary = known_entities
            .into_iter()
            .filter_map(|name| {
                let key = normalize_entity(&name);
                (!key.is_empty() && seen.insert(key.clone()))
                    .then(|| (key, name.trim().to_string()))
            })
            .collect();
        Self { vocabulary }
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    /// Analyze a question. Pure: the same question always yields the
    /// same descriptor.
    pub fn analyze(&self, question: &str) -> QueryDescriptor {
        let normalized_text = normalize_entity(question);
        let padded = format!(" {} ", Self::word_form(question));

        let mut entities = Vec::new();
        let mut keys = HashSet::new();
        let mut add = |name: &str| {
            let key = normalize_entity(name);
            if !key.is_empty() && keys.insert(key) {
                entities.push(name.trim().to_string());
            }
        };

        for quoted in Self::quoted_phrases(question) {
            add(&quoted);
        }
        for (key, display) in &self.vocabulary {
            if padded.contains(&format!(" {} ", Self::word_form(key))) {
                add(display);
            }
        }
        for run in Self::capitalized_runs(question) {
            add(&run);
        }

        QueryDescriptor {
            original_text: question.to_string(),
            intents: Self::detect_intents(&padded),
            normalized_text,
            entities,
        }
    }

    /// Lowercase words separated by single spaces, punctuation dropped
    fn word_form(text: &str) -> String {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn quoted_phrases(text: &str) -> Vec<String> {
        quoted_pattern()
            .captures_iter(text)
            .filter_map(|cap| cap.get(1).map(|m| m.as_str().trim().to_string()))
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Runs of consecutive capitalized (or digit-bearing uppercase) words,
    /// ignoring capitalized stop words such as a leading "What"
    fn capitalized_runs(text: &str) -> Vec<String> {
        let mut runs = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for raw in text.split_whitespace() {
            let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
            let capitalized = word.chars().next().is_some_and(|c| c.is_uppercase())
                && !is_stop_word(word);

            if capitalized {
                current.push(word);
            }
            // Trailing punctuation ends the run even on a capitalized word
            let ends_clause =
                raw.ends_with(|c: char| matches!(c, ',' | '.' | '?' | '!' | ';' | ':'));
            if (!capitalized || ends_clause) && !current.is_empty() {
                runs.push(current.join(" "));
                current.clear();
            }
        }
        if !current.is_empty() {
            runs.push(current.join(" "));
        }
        runs
    }

    fn detect_intents(padded: &str) -> Vec<IntentTag> {
        let has_any = |terms: &[&str]| terms.iter().any(|t| padded.contains(&format!(" {} ", t)));
        let trimmed = padded.trim_start();

        let mut intents = Vec::new();
        if has_any(SAFETY_TERMS) {
            intents.push(IntentTag::Safety);
        }
        if has_any(DEPENDENCY_TERMS) {
            intents.push(IntentTag::Dependency);
        }
        if has_any(PROCEDURAL_TERMS) {
            intents.push(IntentTag::Procedural);
        }
        if DEFINITION_PREFIXES
            .iter()
            .any(|p| trimmed.starts_with(&format!("{} ", Self::word_form(p))))
            || has_any(&["mean", "means"][..])
        {
            intents.push(IntentTag::Definition);
        }
        intents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> QueryAnalyzer {
        QueryAnalyzer::new(vec![
            "Reset".to_string(),
            "FIFO Buffer".to_string(),
            "Firmware Flashing".to_string(),
        ])
    }

    #[test]
    fn test_definition_with_capitalized_product() {
        let descriptor = analyzer().analyze("What is the AcmeFlow X200?");

        assert_eq!(descriptor.entities, vec!["AcmeFlow X200".to_string()]);
        assert_eq!(descriptor.intents, vec![IntentTag::Definition]);
        assert_eq!(descriptor.normalized_text, "what is the acmeflow x200?");
    }

    #[test]
    fn test_vocabulary_matches_lowercase_mentions() {
        let descriptor = analyzer().analyze("is it safe to reset during firmware flashing");

        assert_eq!(
            descriptor.entities,
            vec!["Reset".to_string(), "Firmware Flashing".to_string()]
        );
        assert!(descriptor.has_intent(IntentTag::Safety));
    }

    #[test]
    fn test_quoted_phrase_is_entity() {
        let descriptor = analyzer().analyze("What does \"factory values\" mean?");
        assert_eq!(descriptor.entities[0], "factory values");
        assert!(descriptor.has_intent(IntentTag::Definition));
    }

    #[test]
    fn test_dependency_and_procedural_intents() {
        let descriptor = analyzer().analyze("How do I prepare before Firmware Flashing, and what does it require?");
        assert!(descriptor.has_intent(IntentTag::Dependency));
        assert!(descriptor.has_intent(IntentTag::Procedural));
        assert!(!descriptor.has_intent(IntentTag::Safety));
    }

    #[test]
    fn test_no_entities_keeps_raw_text() {
        let descriptor = QueryAnalyzer::default().analyze("what is the capital of mars");
        assert!(descriptor.entities.is_empty());
        assert_eq!(descriptor.original_text, "what is the capital of mars");
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let a = analyzer().analyze("Does Reset affect the FIFO Buffer?");
        let b = analyzer().analyze("Does Reset affect the FIFO Buffer?");
        assert_eq!(a, b);
    }
}
