//! Hybrid recall engine
//!
//! Embeds the question once, searches both indexes concurrently and fuses
//! the two ranked lists. A failed or timed-out index degrades the result;
//! only losing both indexes (or the query embedding) is an error.

use super::fusion::{FusedHit, ScoreFusion};
use futures::future::join_all;
use manualqa_common::config::RecallConfig;
use manualqa_common::context::QueryDescriptor;
use manualqa_common::errors::{AppError, Result};
use manualqa_common::evidence::{EvidenceOrigin, EvidenceUnit};
use manualqa_common::metrics::{record_embedding, record_stage, record_subsearch_failure};
use manualqa_common::resilience::{retry_transient, RetryPolicy};
use manualqa_common::store::{IndexName, ScoredRecord, StoredRecord};
use manualqa_common::{Embedder, EvidenceStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Units recalled for one query
#[derive(Debug, Clone)]
pub struct RecallOutcome {
    /// Ranked, deduplicated units (at most `top_k`)
    pub units: Vec<EvidenceUnit>,

    /// Indexes that failed or timed out and contributed nothing
    pub degraded: Vec<IndexName>,
}

enum SubSearch {
    Hits(Vec<ScoredRecord>),
    TimedOut,
    Failed(AppError),
}

pub struct HybridRecallEngine {
    store: Arc<dyn EvidenceStore>,
    embedder: Arc<dyn Embedder>,
    config: RecallConfig,
    fusion: ScoreFusion,
}

impl HybridRecallEngine {
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        embedder: Arc<dyn Embedder>,
        config: RecallConfig,
    ) -> Self {
        let fusion = ScoreFusion {
            floor: config.min_similarity,
            fact_weight: config.fact_weight,
            summary_weight: config.summary_weight,
        };
        Self {
            store,
            embedder,
            config,
            fusion,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.max_retries, self.config.initial_backoff_ms)
    }

    /// Ranked evidence for `descriptor`
    #[instrument(skip(self, descriptor), fields(question = %descriptor.original_text))]
    pub async fn recall(&self, descriptor: &QueryDescriptor) -> Result<RecallOutcome> {
        let start = Instant::now();
        let embedding = self.embed_query(&descriptor.original_text).await?;

        let (facts, summaries) = tokio::join!(
            self.search(&embedding, IndexName::AtomicFacts),
            self.search(&embedding, IndexName::Summaries)
        );

        let mut lists = Vec::with_capacity(2);
        let mut degraded = Vec::new();
        let outcomes = [
            (IndexName::AtomicFacts, facts),
            (IndexName::Summaries, summaries),
        ];
        for (index, outcome) in outcomes {
            match outcome {
                SubSearch::Hits(hits) => lists.push(self.fusion.normalize(index, hits)),
                SubSearch::TimedOut => {
                    warn!(
                        index = %index,
                        timeout_ms = self.config.search_timeout_ms,
                        "Index search timed out, continuing without it"
                    );
                    record_subsearch_failure(&index.to_string(), "timeout");
                    degraded.push(index);
                }
                SubSearch::Failed(e) => {
                    warn!(index = %index, error = %e, "Index search failed, continuing without it");
                    record_subsearch_failure(&index.to_string(), "error");
                    degraded.push(index);
                }
            }
        }

        if lists.is_empty() {
            return Err(AppError::RetrievalUnavailable {
                message: "both index searches failed".to_string(),
            });
        }

        let merged = self.fusion.merge(lists, self.config.top_k);
        let units = self.hydrate(merged).await;

        record_stage("recall", start.elapsed().as_secs_f64());
        debug!(
            units = units.len(),
            degraded = degraded.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Recall complete"
        );

        Ok(RecallOutcome { units, degraded })
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let result = retry_transient(self.retry_policy(), "embed_query", || {
            self.embedder.embed(text)
        })
        .await;
        record_embedding(
            start.elapsed().as_secs_f64(),
            self.embedder.model_name(),
            result.is_ok(),
        );

        result.map_err(|e| AppError::RetrievalUnavailable {
            message: format!("query embedding failed: {}", e),
        })
    }

    /// One index search. Transient store errors are retried; a timed-out
    /// attempt is not.
    async fn search(&self, embedding: &[f32], index: IndexName) -> SubSearch {
        let timeout = Duration::from_millis(self.config.search_timeout_ms);
        let k = self.config.per_index_k;

        let result = retry_transient(self.retry_policy(), "vector_search", || async move {
            let searched =
                tokio::time::timeout(timeout, self.store.vector_search(embedding, index, k)).await;
            match searched {
                Ok(hits) => hits.map(Some),
                Err(_) => Ok(None),
            }
        })
        .await;

        match result {
            Ok(Some(hits)) => SubSearch::Hits(hits),
            Ok(None) => SubSearch::TimedOut,
            Err(e) => SubSearch::Failed(e),
        }
    }

    /// Fetch the records behind the fused hits, keeping fused order
    async fn hydrate(&self, hits: Vec<FusedHit>) -> Vec<EvidenceUnit> {
        let lookups = hits.iter().map(|hit| self.store.get_by_id(&hit.id));
        let records = join_all(lookups).await;

        hits.into_iter()
            .zip(records)
            .filter_map(|(hit, record)| match record {
                Ok(Some(StoredRecord::Fact(fact))) => {
                    Some(EvidenceUnit::fact(fact, hit.score, EvidenceOrigin::FactIndex))
                }
                Ok(Some(StoredRecord::Summary(summary))) => {
                    Some(EvidenceUnit::summary(summary, hit.score))
                }
                Ok(None) => {
                    warn!(id = %hit.id, index = %hit.index, "Search hit has no stored record");
                    None
                }
                Err(e) => {
                    warn!(id = %hit.id, error = %e, "Failed to load search hit");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manualqa_common::context::QueryAnalyzer;
    use manualqa_common::evidence::EvidenceBundle;
    use manualqa_common::testing::{guide_store, FaultyStore};
    use manualqa_common::store::InMemoryEvidenceStore;
    use uuid::Uuid;

    fn test_config() -> RecallConfig {
        RecallConfig {
            top_k: 8,
            per_index_k: 12,
            search_timeout_ms: 50,
            min_similarity: 0.2,
            fact_weight: 1.0,
            summary_weight: 0.8,
            max_retries: 1,
            initial_backoff_ms: 1,
        }
    }

    fn descriptor(question: &str) -> QueryDescriptor {
        QueryAnalyzer::new(Vec::new()).analyze(question)
    }

    fn engine_over(store: FaultyStore<Arc<InMemoryEvidenceStore>>) -> HybridRecallEngine {
        let (embedder, _) = guide_store().unwrap();
        HybridRecallEngine::new(Arc::new(store), embedder, test_config())
    }

    fn faulty_guide() -> FaultyStore<Arc<InMemoryEvidenceStore>> {
        let (_, store) = guide_store().unwrap();
        FaultyStore::new(store)
    }

    fn guide_engine() -> HybridRecallEngine {
        let (embedder, store) = guide_store().unwrap();
        HybridRecallEngine::new(store, embedder, test_config())
    }

    fn keys(units: &[EvidenceUnit]) -> Vec<String> {
        units.iter().map(|u| u.key()).collect()
    }

    #[tokio::test]
    async fn test_recall_ranks_product_facts_first() {
        let outcome = guide_engine()
            .recall(&descriptor("What is the AcmeFlow X200?"))
            .await
            .unwrap();

        let keys = keys(&outcome.units);
        assert_eq!(keys[0], "fact:1.0_0");
        assert!(keys.contains(&"fact:1.0_1".to_string()));
        assert!(keys.contains(&"summary:1_s1".to_string()));
        assert!(outcome.degraded.is_empty());
        assert!(outcome.units.iter().all(|u| u.score > 0.0 && u.score <= 1.0));
    }

    #[tokio::test]
    async fn test_unrelated_question_recalls_nothing() {
        let outcome = guide_engine()
            .recall(&descriptor("What is the capital of Mars?"))
            .await
            .unwrap();

        assert!(outcome.units.is_empty());
    }

    #[tokio::test]
    async fn test_recall_is_deterministic_and_dedup_idempotent() {
        let engine = guide_engine();
        let query = descriptor("What does the Reset command do?");

        let first = engine.recall(&query).await.unwrap();
        let second = engine.recall(&query).await.unwrap();
        assert_eq!(keys(&first.units), keys(&second.units));

        let mut bundle = EvidenceBundle::new(Uuid::new_v4());
        let added = bundle.extend(first.units.clone());
        let readded = bundle.extend(second.units);
        assert_eq!(added, first.units.len());
        assert_eq!(readded, 0);
        assert_eq!(bundle.len(), first.units.len());
    }

    #[tokio::test]
    async fn test_top_k_is_respected() {
        let (embedder, store) = guide_store().unwrap();
        let engine = HybridRecallEngine::new(
            store,
            embedder,
            RecallConfig {
                top_k: 1,
                ..test_config()
            },
        );

        let outcome = engine
            .recall(&descriptor("What does the Reset command do?"))
            .await
            .unwrap();
        assert_eq!(keys(&outcome.units), vec!["fact:3.1_0".to_string()]);
    }

    #[tokio::test]
    async fn test_one_failed_index_degrades() {
        let engine = engine_over(faulty_guide().failing(IndexName::Summaries));

        let outcome = engine
            .recall(&descriptor("What is the AcmeFlow X200?"))
            .await
            .unwrap();

        assert_eq!(outcome.degraded, vec![IndexName::Summaries]);
        assert!(!outcome.units.is_empty());
        assert!(outcome.units.iter().all(|u| u.key().starts_with("fact:")));
    }

    #[tokio::test]
    async fn test_timed_out_index_contributes_nothing() {
        let engine = engine_over(
            faulty_guide().stalling(IndexName::AtomicFacts, Duration::from_millis(500)),
        );

        let outcome = engine
            .recall(&descriptor("What is the AcmeFlow X200?"))
            .await
            .unwrap();

        assert_eq!(outcome.degraded, vec![IndexName::AtomicFacts]);
        assert_eq!(keys(&outcome.units), vec!["summary:1_s1".to_string()]);
    }

    #[tokio::test]
    async fn test_both_indexes_failing_is_unavailable() {
        let engine = engine_over(
            faulty_guide()
                .failing(IndexName::AtomicFacts)
                .failing(IndexName::Summaries),
        );

        let result = engine.recall(&descriptor("What is the AcmeFlow X200?")).await;
        assert!(matches!(result, Err(AppError::RetrievalUnavailable { .. })));
    }
}
