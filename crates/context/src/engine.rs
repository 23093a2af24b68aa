//! Answer engine - the full question-to-verified-answer pipeline
//!
//! analyze -> recall -> traverse -> bundle -> draft -> gate
//!
//! Every failure ends in the same refusal shape. The reason is logged and
//! counted but never leaks into the response.

use manualqa_common::config::{AppConfig, EngineConfig};
use manualqa_common::context::{
    create_entailment, Citation, ConfidenceGate, ConfidenceVerdict, QueryAnalyzer,
    SynthesisAssembler,
};
use manualqa_common::errors::{AppError, Result};
use manualqa_common::evidence::{EvidenceBundle, EvidenceKind};
use manualqa_common::metrics::{record_bundle, record_query, record_stage, record_verdict};
use manualqa_common::resilience::RetryPolicy;
use manualqa_common::{Embedder, EvidenceStore, LanguageModel};
use manualqa_search::{GraphTraversalEngine, HybridRecallEngine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Every refusal message starts with this sentence
pub const REFUSAL_PREFIX: &str = "I cannot answer this question from the manual.";

/// Client-facing answer: either verified prose with citations or a refusal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub refusal: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub citations: Vec<Citation>,
}

impl QueryResponse {
    pub fn answered(answer: String, citations: Vec<Citation>) -> Self {
        Self {
            answer: Some(answer),
            refusal: false,
            message: None,
            citations,
        }
    }

    pub fn refused(reason: RefusalReason) -> Self {
        Self {
            answer: None,
            refusal: true,
            message: Some(format!("{} {}", REFUSAL_PREFIX, reason.hint())),
            citations: Vec::new(),
        }
    }
}

/// Why a query was refused; internal, for logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    /// Nothing relevant survived the relevance floor
    NoEvidence,
    /// Both indexes or the query embedding failed
    RetrievalUnavailable,
    /// The language model could not be reached
    GenerationUnavailable,
    /// The language model did not answer in time
    GenerationTimeout,
    /// The language model returned nothing usable
    MalformedDraft,
    /// Some sentence had no supporting evidence after every re-draft
    Unverified,
    /// The whole query ran past its deadline
    Timeout,
    /// Anything else
    Internal,
}

impl RefusalReason {
    pub fn from_error(error: &AppError) -> Self {
        match error {
            AppError::EmptyEvidence { .. } => RefusalReason::NoEvidence,
            AppError::RetrievalUnavailable { .. } => RefusalReason::RetrievalUnavailable,
            AppError::GenerationUnavailable { .. } => RefusalReason::GenerationUnavailable,
            AppError::GenerationTimeout { .. } => RefusalReason::GenerationTimeout,
            AppError::MalformedDraft { .. } => RefusalReason::MalformedDraft,
            AppError::ConfidenceFailure { .. } => RefusalReason::Unverified,
            _ => RefusalReason::Internal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefusalReason::NoEvidence => "no_evidence",
            RefusalReason::RetrievalUnavailable => "retrieval_unavailable",
            RefusalReason::GenerationUnavailable => "generation_unavailable",
            RefusalReason::GenerationTimeout => "generation_timeout",
            RefusalReason::MalformedDraft => "malformed_draft",
            RefusalReason::Unverified => "unverified",
            RefusalReason::Timeout => "timeout",
            RefusalReason::Internal => "internal",
        }
    }

    /// Human explanation appended to the refusal prefix
    fn hint(&self) -> &'static str {
        match self {
            RefusalReason::NoEvidence | RefusalReason::RetrievalUnavailable => {
                "No sufficiently relevant evidence was found."
            }
            RefusalReason::Unverified | RefusalReason::MalformedDraft => {
                "A draft answer could not be fully verified against the evidence."
            }
            RefusalReason::GenerationUnavailable
            | RefusalReason::GenerationTimeout
            | RefusalReason::Timeout
            | RefusalReason::Internal => "The answering service is temporarily unavailable.",
        }
    }
}

impl fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one query produced, response included
#[derive(Debug, Clone, Serialize)]
pub struct AnswerReport {
    pub query_id: Uuid,

    pub response: QueryResponse,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal_reason: Option<RefusalReason>,

    /// Drafts requested (1 + re-drafts)
    pub attempts: u32,

    /// Verdicts of the last gated draft
    pub verdicts: Vec<ConfidenceVerdict>,

    /// Evidence the drafts were built from, if retrieval got that far
    #[serde(skip)]
    pub bundle: Option<EvidenceBundle>,
}

impl AnswerReport {
    pub fn passed(&self) -> bool {
        !self.response.refusal
    }
}

/// Mutable trace of one query, filled in as stages complete
#[derive(Default)]
struct QueryTrace {
    attempts: u32,
    verdicts: Vec<ConfidenceVerdict>,
    bundle: Option<EvidenceBundle>,
}

/// Injected capabilities the engine is built over
#[derive(Clone)]
pub struct EnginePorts {
    pub store: Arc<dyn EvidenceStore>,
    pub embedder: Arc<dyn Embedder>,
    pub model: Arc<dyn LanguageModel>,
}

pub struct AnswerEngine {
    analyzer: QueryAnalyzer,
    recall: HybridRecallEngine,
    traversal: GraphTraversalEngine,
    assembler: SynthesisAssembler,
    gate: ConfidenceGate,
    config: EngineConfig,
}

impl AnswerEngine {
    /// Wire the pipeline over `ports`. The analyzer vocabulary is read
    /// from the store once, here.
    pub async fn new(config: &AppConfig, ports: EnginePorts) -> Result<Self> {
        let vocabulary = ports.store.known_entities().await?;
        let analyzer = QueryAnalyzer::new(vocabulary);

        let generation_timeout = Duration::from_millis(config.generation.timeout_ms);
        let generation_retry = RetryPolicy::new(
            config.generation.max_retries,
            config.generation.initial_backoff_ms,
        );
        let entailment = create_entailment(&config.gate, ports.model.clone(), generation_timeout);

        info!(
            vocabulary = analyzer.vocabulary_size(),
            model = ports.model.model_name(),
            embedder = ports.embedder.model_name(),
            entailment = entailment.name(),
            "Answer engine ready"
        );

        Ok(Self {
            analyzer,
            recall: HybridRecallEngine::new(
                ports.store.clone(),
                ports.embedder,
                config.recall.clone(),
            ),
            traversal: GraphTraversalEngine::new(ports.store, config.traversal.clone()),
            assembler: SynthesisAssembler::new(ports.model, generation_timeout, generation_retry),
            gate: ConfidenceGate::new(entailment),
            config: config.engine.clone(),
        })
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.config.query_timeout_ms)
    }

    /// Answer within the configured query deadline
    pub async fn answer(&self, question: &str) -> AnswerReport {
        self.answer_within(question, self.query_timeout()).await
    }

    /// Answer, refusing if the whole pipeline takes longer than `timeout`
    pub async fn answer_within(&self, question: &str, timeout: Duration) -> AnswerReport {
        let query_id = Uuid::new_v4();
        let span = tracing::info_span!("query", query_id = %query_id);
        let start = Instant::now();

        async move {
            info!(question = %question, "Query received");
            let mut trace = QueryTrace::default();

            let result =
                tokio::time::timeout(timeout, self.run(question, query_id, &mut trace)).await;

            let (response, reason) = match result {
                Ok(Ok(response)) => (response, None),
                Ok(Err(e)) => {
                    let reason = RefusalReason::from_error(&e);
                    warn!(code = e.code().as_code(), reason = %reason, error = %e, "Query refused");
                    (QueryResponse::refused(reason), Some(reason))
                }
                Err(_) => {
                    warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        "Query deadline exceeded, refusing"
                    );
                    let reason = RefusalReason::Timeout;
                    (QueryResponse::refused(reason), Some(reason))
                }
            };

            let outcome = reason.map(|r| r.as_str()).unwrap_or("answered");
            record_query(start.elapsed().as_secs_f64(), outcome);
            info!(
                outcome = outcome,
                attempts = trace.attempts,
                citations = response.citations.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Query complete"
            );

            AnswerReport {
                query_id,
                response,
                refusal_reason: reason,
                attempts: trace.attempts,
                verdicts: trace.verdicts,
                bundle: trace.bundle,
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        question: &str,
        query_id: Uuid,
        trace: &mut QueryTrace,
    ) -> Result<QueryResponse> {
        let descriptor = self.analyzer.analyze(question);
        debug!(
            entities = ?descriptor.entities,
            intents = ?descriptor.intents,
            "Question analyzed"
        );

        let recalled = self.recall.recall(&descriptor).await?;
        let expanded = self.traversal.expand(&descriptor, &recalled.units).await;

        let mut bundle = EvidenceBundle::new(query_id);
        bundle.extend(recalled.units);
        let from_graph = bundle.extend(expanded.units);
        bundle.retain_above(self.config.relevance_floor);
        bundle.truncate(self.config.max_bundle_units);

        record_bundle(
            bundle.count_of(EvidenceKind::Fact),
            bundle.count_of(EvidenceKind::Summary),
            bundle.count_of(EvidenceKind::Relation),
        );
        info!(
            units = bundle.len(),
            from_graph = from_graph,
            hops = expanded.hops,
            degraded = ?recalled.degraded,
            fingerprint = %bundle.fingerprint(),
            "Evidence bundle assembled"
        );

        if bundle.is_empty() {
            return Err(AppError::EmptyEvidence {
                floor: self.config.relevance_floor,
            });
        }
        trace.bundle = Some(bundle.clone());

        let mut last_error = None;
        for attempt in 0..=self.config.max_redrafts {
            trace.attempts = attempt + 1;
            let prompt = SynthesisAssembler::assemble(question, &bundle, attempt > 0);

            let generation_start = Instant::now();
            let drafted = self.assembler.draft(&prompt).await;
            record_stage("generation", generation_start.elapsed().as_secs_f64());

            let draft = match drafted {
                Ok(draft) => draft,
                Err(e @ AppError::MalformedDraft { .. }) => {
                    warn!(attempt = attempt, error = %e, "Draft unusable");
                    record_verdict(false, attempt);
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let gate_start = Instant::now();
            let outcome = self.gate.verify(&draft.text, &bundle).await?;
            record_stage("gate", gate_start.elapsed().as_secs_f64());
            record_verdict(outcome.passed(), attempt);

            let passed = outcome.passed();
            let unsupported = outcome.unsupported_count();
            let total = outcome.verdicts.len();
            trace.verdicts = outcome.verdicts;

            if passed {
                return Ok(QueryResponse::answered(outcome.draft, outcome.citations));
            }

            warn!(
                attempt = attempt,
                unsupported = unsupported,
                total = total,
                "Draft failed verification"
            );
            last_error = Some(AppError::ConfidenceFailure { unsupported, total });
        }

        Err(last_error.unwrap_or(AppError::ConfidenceFailure {
            unsupported: 0,
            total: 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusal_shape() {
        let response = QueryResponse::refused(RefusalReason::NoEvidence);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["refusal"], true);
        assert_eq!(json["citations"], serde_json::json!([]));
        assert!(json.get("answer").is_none());
        assert!(json["message"]
            .as_str()
            .unwrap()
            .starts_with(REFUSAL_PREFIX));
    }

    #[test]
    fn test_answer_shape_omits_refusal_fields() {
        let response =
            QueryResponse::answered("The Reset command clears it [1].".to_string(), vec![]);
        let json = serde_json::to_value(&response).unwrap();

        assert!(json.get("refusal").is_none());
        assert!(json.get("message").is_none());
        assert_eq!(json["answer"], "The Reset command clears it [1].");
    }

    #[test]
    fn test_refusal_messages_never_carry_codes() {
        for error in [
            AppError::EmptyEvidence { floor: 0.05 },
            AppError::GenerationTimeout { timeout_ms: 10 },
            AppError::ConfidenceFailure {
                unsupported: 1,
                total: 2,
            },
        ] {
            let reason = RefusalReason::from_error(&error);
            let message = QueryResponse::refused(reason).message.unwrap();
            assert!(!message.contains(reason.as_str()));
            assert!(!message.contains(&error.code().as_code().to_string()));
        }
    }
}
