//! Confidence Gate - sentence-level verification of a draft
//!
//! A draft passes only if every claim sentence is backed by at least one
//! unit of the query's own bundle. Support is existential over units:
//! adding evidence can turn a failed verdict into a passed one, never the
//! reverse.
//!
//! A sentence is supported by a unit when
//! - it quotes (`"..."`) text the unit contains, or
//! - the entailment strategy accepts the (unit text, sentence) pair.
//!
//! A sentence citing a marker outside the bundle is unsupported no matter
//! what else it says. Markers that are in the bundle are checked first;
//! when the cited units do not back the sentence, the rest of the bundle
//! is searched and the verdict records the mismatched markers.

use super::entailment::EntailmentCheck;
use super::synthesizer::{extract_markers, strip_markers, Citation};
use crate::errors::{AppError, Result};
use crate::evidence::EvidenceBundle;
use crate::text::split_sentences;
use futures::future::join_all;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

fn quote_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"["“]([^"“”]+)["”]"#).expect("static quote pattern")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Drafted,
    Verifying,
    Passed,
    Failed,
}

impl GateState {
    fn can_transition(self, next: GateState) -> bool {
        matches!(
            (self, next),
            (GateState::Drafted, GateState::Verifying)
                | (GateState::Verifying, GateState::Passed)
                | (GateState::Verifying, GateState::Failed)
        )
    }
}

/// Tracks one draft through the gate
#[derive(Debug)]
struct GateRun {
    state: GateState,
}

impl GateRun {
    fn new() -> Self {
        Self {
            state: GateState::Drafted,
        }
    }

    fn advance(&mut self, next: GateState) -> Result<()> {
        if !self.state.can_transition(next) {
            return Err(AppError::Internal {
                message: format!("illegal gate transition {:?} -> {:?}", self.state, next),
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Why a sentence was not supported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unsupported {
    /// Cites a marker that is not in the bundle
    ForgedCitation,
    /// Quotes text no unit contains
    UnmatchedQuote,
    /// No unit entails the sentence
    NoEvidence,
}

/// Per-sentence verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceVerdict {
    /// Position in the draft's sentence list
    pub index: usize,

    pub sentence: String,

    /// Keys of the units that support the sentence
    pub supporting: Vec<String>,

    /// Markers the sentence cites whose units do not support it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mismatched_markers: Vec<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsupported: Option<Unsupported>,
}

impl ConfidenceVerdict {
    pub fn is_supported(&self) -> bool {
        self.unsupported.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GateOutcome {
    pub state: GateState,

    /// Draft exactly as the model wrote it
    pub draft: String,

    /// Verdicts for claim sentences only
    pub verdicts: Vec<ConfidenceVerdict>,

    /// Union of supporting units; empty unless passed
    pub citations: Vec<Citation>,
}

impl GateOutcome {
    pub fn passed(&self) -> bool {
        self.state == GateState::Passed
    }

    pub fn unsupported_count(&self) -> usize {
        self.verdicts.iter().filter(|v| !v.is_supported()).count()
    }
}

pub struct ConfidenceGate {
    entailment: Arc<dyn EntailmentCheck>,
}

impl ConfidenceGate {
    pub fn new(entailment: Arc<dyn EntailmentCheck>) -> Self {
        Self { entailment }
    }

    pub fn strategy(&self) -> &'static str {
        self.entailment.name()
    }

    /// Verify `draft` against `bundle`
    pub async fn verify(&self, draft: &str, bundle: &EvidenceBundle) -> Result<GateOutcome> {
        let mut run = GateRun::new();
        run.advance(GateState::Verifying)?;

        let unit_texts: Vec<String> = bundle.units().iter().map(|u| u.text()).collect();
        let all: Vec<usize> = (0..unit_texts.len()).collect();
        let mut verdicts = Vec::new();
        // unit position -> sentence indices it supports
        let mut support: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

        for (index, sentence) in split_sentences(draft).into_iter().enumerate() {
            let claim = strip_markers(&sentence);
            if !claim.chars().any(|c| c.is_alphanumeric()) {
                continue;
            }

            let markers = extract_markers(&sentence);
            let forged = markers.iter().any(|&m| m == 0 || m > bundle.len());

            let mut mismatched_markers = Vec::new();
            let (supporters, unsupported) = if forged {
                (Vec::new(), Some(Unsupported::ForgedCitation))
            } else if markers.is_empty() {
                self.supporters(&claim, &unit_texts, &all).await?
            } else {
                let cited: Vec<usize> = markers.iter().map(|&m| m - 1).collect();
                let (backing, reason) = self.supporters(&claim, &unit_texts, &cited).await?;
                mismatched_markers = markers
                    .iter()
                    .copied()
                    .filter(|&m| !backing.contains(&(m - 1)))
                    .collect();
                if reason.is_none() {
                    (backing, None)
                } else {
                    self.supporters(&claim, &unit_texts, &all).await?
                }
            };

            if unsupported.is_none() && !mismatched_markers.is_empty() {
                warn!(
                    sentence = index,
                    markers = ?mismatched_markers,
                    "Cited units do not support sentence"
                );
            }

            for &pos in &supporters {
                support.entry(pos).or_default().push(index);
            }

            debug!(
                sentence = index,
                supporters = supporters.len(),
                reason = ?unsupported,
                "Sentence checked"
            );

            verdicts.push(ConfidenceVerdict {
                index,
                sentence,
                supporting: supporters
                    .iter()
                    .map(|&pos| bundle.units()[pos].key())
                    .collect(),
                mismatched_markers,
                unsupported,
            });
        }

        let claims = verdicts.len();
        let unsupported = verdicts.iter().filter(|v| !v.is_supported()).count();
        let passed = claims > 0 && unsupported == 0;
        run.advance(if passed {
            GateState::Passed
        } else {
            GateState::Failed
        })?;

        let citations = if passed {
            support
                .into_iter()
                .map(|(pos, sentences)| {
                    Citation::from_unit(pos + 1, &bundle.units()[pos], sentences)
                })
                .collect()
        } else {
            Vec::new()
        };

        info!(
            query_id = %bundle.query_id(),
            strategy = self.entailment.name(),
            claims = claims,
            unsupported = unsupported,
            verdict = ?run.state,
            "Draft verified"
        );

        Ok(GateOutcome {
            state: run.state,
            draft: draft.to_string(),
            verdicts,
            citations,
        })
    }

    /// Positions in `scope` of every unit supporting `claim`, or the reason
    /// none does
    async fn supporters(
        &self,
        claim: &str,
        unit_texts: &[String],
        scope: &[usize],
    ) -> Result<(Vec<usize>, Option<Unsupported>)> {
        let quotes: Vec<String> = quote_pattern()
            .captures_iter(claim)
            .filter_map(|cap| cap.get(1).map(|m| m.as_str().trim().to_lowercase()))
            .filter(|q| !q.is_empty())
            .collect();

        if !quotes.is_empty() {
            let lowered: Vec<(usize, String)> = scope
                .iter()
                .map(|&pos| (pos, unit_texts[pos].to_lowercase()))
                .collect();
            if quotes.iter().all(|q| lowered.iter().any(|(_, t)| t.contains(q.as_str()))) {
                let positions: Vec<usize> = lowered
                    .iter()
                    .filter(|(_, t)| quotes.iter().any(|q| t.contains(q.as_str())))
                    .map(|(pos, _)| *pos)
                    .collect();
                return Ok((positions, None));
            }
            return Ok((Vec::new(), Some(Unsupported::UnmatchedQuote)));
        }

        let checks = scope
            .iter()
            .map(|&pos| self.entailment.entails(&unit_texts[pos], claim));
        let results = join_all(checks).await;

        let mut positions = Vec::new();
        for (&pos, result) in scope.iter().zip(results) {
            if result? {
                positions.push(pos);
            }
        }

        if positions.is_empty() {
            Ok((positions, Some(Unsupported::NoEvidence)))
        } else {
            Ok((positions, None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::entailment::LexicalCoverage;
    use crate::evidence::{AtomicFact, EvidenceOrigin, EvidenceUnit, SourceLocator};
    use uuid::Uuid;

    fn fact(id: &str, page: u32, text: &str) -> EvidenceUnit {
        EvidenceUnit::fact(
            Arc::new(AtomicFact {
                id: id.to_string(),
                text: text.to_string(),
                embedding: vec![1.0],
                document: "Guide.pdf".to_string(),
                locator: SourceLocator::page(page),
                section_id: "1".to_string(),
                entities: vec![],
            }),
            0.9,
            EvidenceOrigin::FactIndex,
        )
    }

    fn bundle(units: Vec<EvidenceUnit>) -> EvidenceBundle {
        let mut bundle = EvidenceBundle::new(Uuid::new_v4());
        bundle.extend(units);
        bundle
    }

    fn gate() -> ConfidenceGate {
        ConfidenceGate::new(Arc::new(LexicalCoverage::new(0.6)))
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut run = GateRun::new();
        assert!(run.advance(GateState::Passed).is_err());
        run.advance(GateState::Verifying).unwrap();
        run.advance(GateState::Failed).unwrap();
        assert!(run.advance(GateState::Verifying).is_err());
        assert!(run.advance(GateState::Passed).is_err());
    }

    #[tokio::test]
    async fn test_supported_draft_passes_with_sentence_indices() {
        let bundle = bundle(vec![
            fact("a", 1, "The AcmeFlow X200 is a programmable flow controller."),
            fact("b", 1, "The AcmeFlow X200 supports Modbus RTU."),
        ]);
        let draft = "The AcmeFlow X200 is a programmable flow controller [1]. It supports Modbus RTU [2].";

        let outcome = gate().verify(draft, &bundle).await.unwrap();

        assert!(outcome.passed());
        assert_eq!(outcome.draft, draft);
        let markers: Vec<usize> = outcome.citations.iter().map(|c| c.marker).collect();
        assert!(markers.contains(&1) && markers.contains(&2));
        let first = outcome.citations.iter().find(|c| c.marker == 1).unwrap();
        assert!(first.sentences.contains(&0));
    }

    #[tokio::test]
    async fn test_one_unsupported_sentence_fails_everything() {
        let bundle = bundle(vec![fact("a", 1, "The AcmeFlow X200 is a programmable flow controller.")]);
        let draft = "The AcmeFlow X200 is a programmable flow controller [1]. It also brews espresso.";

        let outcome = gate().verify(draft, &bundle).await.unwrap();

        assert_eq!(outcome.state, GateState::Failed);
        assert_eq!(outcome.unsupported_count(), 1);
        assert!(outcome.citations.is_empty());
        assert_eq!(outcome.verdicts[1].unsupported, Some(Unsupported::NoEvidence));
    }

    #[tokio::test]
    async fn test_forged_marker_is_unsupported() {
        let bundle = bundle(vec![fact("a", 1, "The Reset command clears the FIFO Buffer.")]);
        let draft = "The Reset command clears the FIFO Buffer [7].";

        let outcome = gate().verify(draft, &bundle).await.unwrap();

        assert!(!outcome.passed());
        assert_eq!(outcome.verdicts[0].unsupported, Some(Unsupported::ForgedCitation));
    }

    #[tokio::test]
    async fn test_direct_quote_support() {
        let bundle = bundle(vec![fact("a", 12, "The Reset command clears the FIFO Buffer.")]);

        let quoted = gate()
            .verify("The manual says Reset \"clears the FIFO Buffer\" [1].", &bundle)
            .await
            .unwrap();
        assert!(quoted.passed());

        let invented = gate()
            .verify("The manual says Reset \"erases all flash memory\".", &bundle)
            .await
            .unwrap();
        assert_eq!(invented.verdicts[0].unsupported, Some(Unsupported::UnmatchedQuote));
    }

    #[tokio::test]
    async fn test_contradicted_or_embellished_sentence_fails() {
        let bundle = bundle(vec![
            fact("3.1_0", 12, "The Reset command clears the FIFO Buffer."),
            fact("3.2_0", 14, "Firmware Flashing must not be started while a Reset is in progress."),
        ]);

        let flipped = gate()
            .verify("Firmware Flashing can be started while a Reset is in progress [2].", &bundle)
            .await
            .unwrap();
        assert!(!flipped.passed());
        assert_eq!(flipped.verdicts[0].unsupported, Some(Unsupported::NoEvidence));

        let embellished = gate()
            .verify("The Reset command clears the FIFO Buffer and erases flash memory [1].", &bundle)
            .await
            .unwrap();
        assert!(!embellished.passed());
        assert!(embellished.citations.is_empty());
    }

    #[tokio::test]
    async fn test_cited_units_are_preferred() {
        let bundle = bundle(vec![
            fact("3.1_0", 12, "The Reset command clears the FIFO Buffer."),
            fact("3.1_0b", 13, "The Reset command clears the FIFO Buffer."),
        ]);

        let outcome = gate()
            .verify("The Reset command clears the FIFO Buffer [2].", &bundle)
            .await
            .unwrap();

        assert!(outcome.passed());
        assert_eq!(outcome.verdicts[0].supporting, vec![bundle.units()[1].key()]);
        assert!(outcome.verdicts[0].mismatched_markers.is_empty());
        let markers: Vec<usize> = outcome.citations.iter().map(|c| c.marker).collect();
        assert_eq!(markers, vec![2]);
    }

    #[tokio::test]
    async fn test_misattributed_marker_is_recorded() {
        let bundle = bundle(vec![
            fact("3.1_0", 12, "The Reset command clears the FIFO Buffer."),
            fact("3.2_1", 14, "Firmware Flashing requires a stable Power Supply."),
        ]);

        let outcome = gate()
            .verify("Firmware Flashing requires a stable Power Supply [1].", &bundle)
            .await
            .unwrap();

        assert!(outcome.passed());
        let verdict = &outcome.verdicts[0];
        assert_eq!(verdict.mismatched_markers, vec![1]);
        assert_eq!(verdict.supporting, vec![bundle.units()[1].key()]);
        assert_eq!(outcome.citations[0].marker, 2);

        let partial = gate()
            .verify("The Reset command clears the FIFO Buffer [1][2].", &bundle)
            .await
            .unwrap();
        assert_eq!(partial.verdicts[0].mismatched_markers, vec![2]);
    }

    #[tokio::test]
    async fn test_no_claims_fails() {
        let bundle = bundle(vec![fact("a", 1, "The Reset command clears the FIFO Buffer.")]);
        let outcome = gate().verify("[1]", &bundle).await.unwrap();
        assert_eq!(outcome.state, GateState::Failed);
        assert!(outcome.verdicts.is_empty());
    }

    #[tokio::test]
    async fn test_more_evidence_never_flips_pass_to_fail() {
        let draft = "The Reset command clears the FIFO Buffer [1].";
        let small = bundle(vec![fact("a", 12, "The Reset command clears the FIFO Buffer.")]);
        let large = bundle(vec![
            fact("a", 12, "The Reset command clears the FIFO Buffer."),
            fact("b", 14, "Firmware Flashing requires a stable Power Supply."),
        ]);

        assert!(gate().verify(draft, &small).await.unwrap().passed());
        assert!(gate().verify(draft, &large).await.unwrap().passed());
    }
}
