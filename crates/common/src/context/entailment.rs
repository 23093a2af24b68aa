//! Entailment strategies for the confidence gate

use crate::config::{EntailmentStrategy, GateConfig};
use crate::errors::{AppError, Result};
use crate::generation::LanguageModel;
use crate::text::{content_tokens, polarity, split_sentences, Polarity};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether one piece of evidence backs one claim sentence
#[async_trait]
pub trait EntailmentCheck: Send + Sync {
    async fn entails(&self, evidence: &str, claim: &str) -> Result<bool>;

    fn name(&self) -> &'static str;
}

/// Accepts a claim when one sentence of the evidence
/// - contains at least `threshold` of the claim's content tokens,
/// - leaves at most one of them uncovered, and
/// - has the claim's negation and modal force.
pub struct LexicalCoverage {
    threshold: f32,
}

/// Content tokens a claim may add beyond its evidence sentence
const MAX_UNCOVERED: usize = 1;

impl LexicalCoverage {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn coverage(evidence: &str, claim: &str) -> f32 {
        let (covered, total) = Self::counts(evidence, claim);
        if total == 0 {
            return 0.0;
        }
        covered as f32 / total as f32
    }

    /// (covered, total) distinct claim content tokens
    fn counts(evidence: &str, claim: &str) -> (usize, usize) {
        let claim_tokens: HashSet<String> = content_tokens(claim).into_iter().collect();
        let evidence_tokens: HashSet<String> = content_tokens(evidence).into_iter().collect();
        let covered = claim_tokens
            .iter()
            .filter(|t| evidence_tokens.contains(*t))
            .count();
        (covered, claim_tokens.len())
    }

    fn sentence_entails(&self, sentence: &str, claim: &str, claim_polarity: Polarity) -> bool {
        let (covered, total) = Self::counts(sentence, claim);
        if covered == 0 || total - covered > MAX_UNCOVERED {
            return false;
        }
        if (covered as f32 / total as f32) < self.threshold {
            return false;
        }

        let evidence_polarity = polarity(sentence);
        if evidence_polarity.negated != claim_polarity.negated {
            return false;
        }
        claim_polarity
            .modality
            .map_or(true, |m| evidence_polarity.modality == Some(m))
    }
}

#[async_trait]
impl EntailmentCheck for LexicalCoverage {
    async fn entails(&self, evidence: &str, claim: &str) -> Result<bool> {
        let claim_polarity = polarity(claim);
        let mut sentences = split_sentences(evidence);
        if sentences.is_empty() {
            sentences.push(evidence.to_string());
        }
        Ok(sentences
            .iter()
            .any(|sentence| self.sentence_entails(sentence, claim, claim_polarity)))
    }

    fn name(&self) -> &'static str {
        "lexical"
    }
}

const VERIFIER_SYSTEM: &str = "You check whether a premise taken from a technical \
manual entails a hypothesis. Reply with exactly one word: YES or NO.";

/// Asks the language model for a YES/NO entailment judgment
pub struct ModelVerifier {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl ModelVerifier {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }
}

#[async_trait]
impl EntailmentCheck for ModelVerifier {
    async fn entails(&self, evidence: &str, claim: &str) -> Result<bool> {
        let user = format!("Premise: {}\nHypothesis: {}\nAnswer:", evidence, claim);
        let reply = tokio::time::timeout(self.timeout, self.model.complete(VERIFIER_SYSTEM, &user))
            .await
            .map_err(|_| AppError::GenerationTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        Ok(reply.trim().to_uppercase().starts_with("YES"))
    }

    fn name(&self) -> &'static str {
        "model"
    }
}

/// Create the configured entailment strategy
pub fn create_entailment(
    config: &GateConfig,
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
) -> Arc<dyn EntailmentCheck> {
    match config.entailment {
        EntailmentStrategy::Lexical => Arc::new(LexicalCoverage::new(config.lexical_threshold)),
        EntailmentStrategy::Model => Arc::new(ModelVerifier::new(model, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ScriptedModel;

    #[tokio::test]
    async fn test_lexical_accepts_restatement() {
        let check = LexicalCoverage::new(0.6);
        let evidence = "Firmware Flashing must not be started while a Reset is in progress.";

        assert!(check
            .entails(evidence, "Firmware Flashing must not be started during a Reset.")
            .await
            .unwrap());
        assert!(!check
            .entails(evidence, "The X200 brews coffee.")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_lexical_rejects_flipped_negation() {
        let check = LexicalCoverage::new(0.6);
        let evidence = "Firmware Flashing must not be started while a Reset is in progress.";

        for claim in [
            "Firmware Flashing can be started while a Reset is in progress.",
            "Firmware Flashing must be started while a Reset is in progress.",
            "Firmware Flashing may not be started while a Reset is in progress.",
        ] {
            assert!(!check.entails(evidence, claim).await.unwrap(), "{}", claim);
        }
        assert!(!check
            .entails("The Reset command clears the FIFO Buffer.", "Reset never clears the FIFO Buffer.")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_lexical_rejects_invented_clause() {
        let check = LexicalCoverage::new(0.6);
        let evidence = "The Reset command clears the FIFO Buffer.";

        assert!(!check
            .entails(evidence, "The Reset command clears the FIFO Buffer and erases flash memory.")
            .await
            .unwrap());
        assert!(check
            .entails(evidence, "The Reset command always clears the FIFO Buffer.")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_lexical_judges_each_evidence_sentence() {
        let check = LexicalCoverage::new(0.6);
        let evidence = "The Reset command clears the FIFO Buffer. It does not touch the Power Supply.";

        assert!(check
            .entails(evidence, "The Reset command clears the FIFO Buffer.")
            .await
            .unwrap());
        assert!(!check
            .entails(evidence, "The Reset command does not clear the FIFO Buffer.")
            .await
            .unwrap());
    }

    #[test]
    fn test_coverage_of_stop_word_claim_is_zero() {
        assert_eq!(LexicalCoverage::coverage("anything at all", "it is what it is"), 0.0);
    }

    #[tokio::test]
    async fn test_model_verifier_reads_yes_no() {
        let yes = ModelVerifier::new(
            Arc::new(ScriptedModel::drafts(Vec::<String>::new()).with_judge_reply(" yes.")),
            Duration::from_secs(1),
        );
        let no = ModelVerifier::new(
            Arc::new(ScriptedModel::drafts(Vec::<String>::new()).with_judge_reply("NO")),
            Duration::from_secs(1),
        );

        assert!(yes.entails("premise", "hypothesis").await.unwrap());
        assert!(!no.entails("premise", "hypothesis").await.unwrap());
    }
}
