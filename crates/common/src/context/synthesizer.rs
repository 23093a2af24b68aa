//! Synthesis Assembler - turns an evidence bundle into a draft answer
//!
//! Provides:
//! - Numbered prompt context (`[n]` markers over bundle units)
//! - Draft requests with a per-attempt timeout and bounded retry
//! - Citation marker extraction

use crate::errors::{AppError, Result};
use crate::evidence::{EvidenceBundle, EvidenceKind, EvidenceUnit, SourceLocator};
use crate::generation::{LanguageModel, PromptContext, PromptEntry};
use crate::resilience::{retry_transient, RetryPolicy};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("static marker pattern"))
}

/// `[n]` markers in order of first appearance; unparseable numbers are
/// reported as 0 so they can never match a bundle position
pub fn extract_markers(text: &str) -> Vec<usize> {
    let mut markers = Vec::new();
    for cap in marker_pattern().captures_iter(text) {
        if let Some(m) = cap.get(1) {
            let n = m.as_str().parse::<usize>().unwrap_or(0);
            if !markers.contains(&n) {
                markers.push(n);
            }
        }
    }
    markers
}

/// Text with every `[n]` marker removed and whitespace tidied
pub fn strip_markers(text: &str) -> String {
    let stripped = marker_pattern().replace_all(text, "");
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" .", ".")
        .replace(" ,", ",")
}

/// Citation attached to a passed answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// 1-based position of the unit in the prompt context
    pub marker: usize,

    /// Fact, summary or triplet identifier
    pub record_id: String,

    pub kind: EvidenceKind,

    pub document: String,

    pub locator: SourceLocator,

    /// Human-readable source, e.g. "Guide.pdf, page 1, section 1"
    pub label: String,

    /// Evidence text
    pub quote: String,

    /// Indices of the answer sentences this unit supports
    pub sentences: Vec<usize>,
}

impl Citation {
    pub fn from_unit(marker: usize, unit: &EvidenceUnit, sentences: Vec<usize>) -> Self {
        Self {
            marker,
            record_id: unit.citation.record_id.clone(),
            kind: unit.kind(),
            document: unit.citation.document.clone(),
            locator: unit.citation.locator.clone(),
            label: unit.citation.label(),
            quote: unit.text(),
            sentences,
        }
    }
}

/// Raw model output plus the markers it used
#[derive(Debug, Clone)]
pub struct Draft {
    pub text: String,
    pub markers: Vec<usize>,
}

pub struct SynthesisAssembler {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl SynthesisAssembler {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            model,
            timeout,
            retry,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Number the bundle's units in bundle order
    pub fn assemble(question: &str, bundle: &EvidenceBundle, redraft: bool) -> PromptContext {
        let entries = bundle
            .units()
            .iter()
            .enumerate()
            .map(|(i, unit)| PromptEntry {
                marker: i + 1,
                kind: unit.kind(),
                label: unit.citation.label(),
                text: unit.text(),
            })
            .collect();

        PromptContext {
            question: question.to_string(),
            entries,
            redraft,
        }
    }

    /// Request a draft. Each attempt is bounded by the timeout; transient
    /// failures are retried. An empty draft is `MalformedDraft`.
    pub async fn draft(&self, prompt: &PromptContext) -> Result<Draft> {
        let timeout_ms = self.timeout.as_millis() as u64;
        let text = retry_transient(self.retry, "generate", || async {
            tokio::time::timeout(self.timeout, self.model.generate(prompt))
                .await
                .map_err(|_| AppError::GenerationTimeout { timeout_ms })?
        })
        .await?;

        if text.trim().is_empty() {
            return Err(AppError::MalformedDraft {
                message: "model returned an empty draft".to_string(),
            });
        }

        let markers = extract_markers(&text);
        debug!(
            model = self.model.model_name(),
            chars = text.len(),
            markers = markers.len(),
            redraft = prompt.redraft,
            "Draft received"
        );
        Ok(Draft { text, markers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{AtomicFact, EvidenceOrigin};
    use crate::generation::{ScriptStep, ScriptedModel};
    use uuid::Uuid;

    fn bundle() -> EvidenceBundle {
        let mut bundle = EvidenceBundle::new(Uuid::new_v4());
        bundle.push(EvidenceUnit::fact(
            Arc::new(AtomicFact {
                id: "3.1_0".to_string(),
                text: "The Reset command clears the FIFO Buffer.".to_string(),
                embedding: vec![1.0],
                document: "Guide.pdf".to_string(),
                locator: SourceLocator::page(12).with_section("3.1"),
                section_id: "3.1".to_string(),
                entities: vec![],
            }),
            0.9,
            EvidenceOrigin::FactIndex,
        ));
        bundle
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_extract_markers() {
        assert_eq!(
            extract_markers("Reset clears it [2]. See [1][2] and [99999999999999999999999]."),
            vec![2, 1, 0]
        );
    }

    #[test]
    fn test_strip_markers() {
        assert_eq!(
            strip_markers("Reset clears the FIFO Buffer [1]."),
            "Reset clears the FIFO Buffer."
        );
    }

    #[test]
    fn test_assemble_numbers_units() {
        let prompt = SynthesisAssembler::assemble("What does Reset do?", &bundle(), false);
        assert_eq!(prompt.entries.len(), 1);
        assert_eq!(prompt.entries[0].marker, 1);
        assert_eq!(prompt.entries[0].label, "Guide.pdf, page 12, section 3.1");
    }

    #[tokio::test]
    async fn test_empty_draft_is_malformed() {
        let model = Arc::new(ScriptedModel::drafts(["   "]));
        let assembler = SynthesisAssembler::new(model, Duration::from_secs(1), fast_retry());
        let prompt = SynthesisAssembler::assemble("q", &bundle(), false);

        let result = assembler.draft(&prompt).await;
        assert!(matches!(result, Err(AppError::MalformedDraft { .. })));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let model = Arc::new(ScriptedModel::new([
            ScriptStep::Unavailable,
            ScriptStep::Draft("The Reset command clears the FIFO Buffer [1].".to_string()),
        ]));
        let assembler = SynthesisAssembler::new(model.clone(), Duration::from_secs(1), fast_retry());
        let prompt = SynthesisAssembler::assemble("q", &bundle(), false);

        let draft = assembler.draft(&prompt).await.unwrap();
        assert_eq!(draft.markers, vec![1]);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_stalled_model_times_out() {
        let model = Arc::new(ScriptedModel::new([
            ScriptStep::Stall(Duration::from_millis(200), "late".to_string()),
            ScriptStep::Stall(Duration::from_millis(200), "late".to_string()),
        ]));
        let assembler =
            SynthesisAssembler::new(model, Duration::from_millis(20), fast_retry());
        let prompt = SynthesisAssembler::assemble("q", &bundle(), false);

        let result = assembler.draft(&prompt).await;
        assert!(matches!(result, Err(AppError::GenerationTimeout { .. })));
    }
}
