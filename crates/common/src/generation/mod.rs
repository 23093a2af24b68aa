//! Language-generation port
//!
//! The engine never writes prose itself. It hands a numbered evidence
//! context to a `LanguageModel` and verifies whatever comes back.
//!
//! Implementations:
//! - `OpenAIChatModel`: OpenAI-compatible chat completions
//! - `ExtractiveGenerator`: offline, stitches evidence text into cited sentences
//! - `ScriptedModel`: replays canned drafts (tests)

mod extractive;
mod openai;
#[cfg(any(test, feature = "testing"))]
mod scripted;

pub use extractive::ExtractiveGenerator;
pub use openai::OpenAIChatModel;
#[cfg(any(test, feature = "testing"))]
pub use scripted::{ScriptStep, ScriptedModel};

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use crate::evidence::EvidenceKind;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You answer questions about a technical manual. \
Use ONLY the numbered evidence below. Every sentence you write must end with \
the marker(s) of the evidence it relies on, e.g. [1] or [2][3]. Do not assert \
anything the evidence does not state. If a safety constraint or conflict \
appears in the evidence, mention it.";

const REDRAFT_NOTE: &str = "Your previous draft contained statements the \
evidence does not support. Cite more carefully: keep only sentences that a \
numbered evidence item states directly, and cite that item.";

/// One numbered evidence item as presented to the model
#[derive(Debug, Clone, Serialize)]
pub struct PromptEntry {
    /// 1-based marker, `[marker]` in the draft
    pub marker: usize,
    pub kind: EvidenceKind,
    /// Citation label, e.g. "Guide.pdf, page 12, section 3.1"
    pub label: String,
    pub text: String,
}

/// Serialized evidence bundle plus the question
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    pub question: String,
    pub entries: Vec<PromptEntry>,
    /// Set on the single re-draft after a failed verdict
    pub redraft: bool,
}

impl PromptContext {
    pub fn system_prompt(&self) -> String {
        if self.redraft {
            format!("{}\n\n{}", SYSTEM_PROMPT, REDRAFT_NOTE)
        } else {
            SYSTEM_PROMPT.to_string()
        }
    }

    /// User message: question then numbered evidence
    pub fn render(&self) -> String {
        let mut prompt = format!("Question: {}\n\nEvidence:\n", self.question);
        for entry in &self.entries {
            prompt.push_str(&format!(
                "[{}] ({:?}; {}) {}\n",
                entry.marker, entry.kind, entry.label, entry.text
            ));
        }
        prompt.push_str("\nAnswer:");
        prompt
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Free-form completion of a system + user message pair
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Draft an answer over a prompt context
    async fn generate(&self, prompt: &PromptContext) -> Result<String> {
        self.complete(&prompt.system_prompt(), &prompt.render()).await
    }

    fn model_name(&self) -> &str;
}

/// Create a language model based on configuration
pub fn create_language_model(config: &GenerationConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        "extractive" => Ok(Arc::new(ExtractiveGenerator::default())),
        other => Err(AppError::Configuration {
            message: format!("unknown generation provider '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(redraft: bool) -> PromptContext {
        PromptContext {
            question: "What does Reset do?".to_string(),
            entries: vec![PromptEntry {
                marker: 1,
                kind: EvidenceKind::Fact,
                label: "Guide.pdf, page 12".to_string(),
                text: "The Reset command clears the FIFO buffer.".to_string(),
            }],
            redraft,
        }
    }

    #[test]
    fn test_render_numbers_entries() {
        let rendered = context(false).render();
        assert!(rendered.starts_with("Question: What does Reset do?"));
        assert!(rendered.contains("[1] (Fact; Guide.pdf, page 12) The Reset command"));
    }

    #[test]
    fn test_redraft_adds_instruction() {
        assert!(!context(false).system_prompt().contains("Cite more carefully"));
        assert!(context(true).system_prompt().contains("Cite more carefully"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = GenerationConfig {
            provider: "oracle".to_string(),
            ..GenerationConfig::default()
        };
        assert!(create_language_model(&config).is_err());
    }
}
