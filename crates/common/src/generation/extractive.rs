//! Offline generator: restates evidence verbatim with inline markers

use super::{LanguageModel, PromptContext};
use crate::errors::{AppError, Result};
use crate::evidence::EvidenceKind;
use async_trait::async_trait;
use std::collections::HashSet;

/// Builds a draft from the highest-ranked fact and relation entries, one
/// sentence per entry, each ending in its own marker. Summaries are used
/// only when no finer-grained evidence exists.
pub struct ExtractiveGenerator {
    max_sentences: usize,
}

impl ExtractiveGenerator {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self::new(6)
    }
}

#[async_trait]
impl LanguageModel for ExtractiveGenerator {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Err(AppError::GenerationUnavailable {
            message: "extractive generator only drafts from evidence".to_string(),
        })
    }

    async fn generate(&self, prompt: &PromptContext) -> Result<String> {
        let has_fine = prompt
            .entries
            .iter()
            .any(|e| e.kind != EvidenceKind::Summary);

        let mut seen = HashSet::new();
        let sentences: Vec<String> = prompt
            .entries
            .iter()
            .filter(|e| !has_fine || e.kind != EvidenceKind::Summary)
            .filter(|e| seen.insert(e.text.trim().to_lowercase()))
            .take(self.max_sentences)
            .map(|e| {
                let body = e.text.trim().trim_end_matches(['.', '!', '?']);
                format!("{} [{}].", body, e.marker)
            })
            .collect();

        Ok(sentences.join(" "))
    }

    fn model_name(&self) -> &str {
        "extractive"
    }
}
