//! Evidence store abstraction
//!
//! The answering engine only ever reads from the store. Implementations:
//! - `InMemoryEvidenceStore`: arena-style store loaded from an ingestion
//!   snapshot (facts, summaries, triplets keyed by stable identifiers)

mod memory;
mod snapshot;

pub use memory::{InMemoryEvidenceStore, StoreStats};
pub use snapshot::{ExtractionStrategy, SnapshotManifest, StoreSnapshot};

use crate::errors::Result;
use crate::evidence::{AtomicFact, RecordId, RelationKind, RelationTriplet, SummaryNode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Vector indexes exposed by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexName {
    /// Level-0 atomic facts
    AtomicFacts,
    /// Level >= 1 summary nodes
    Summaries,
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexName::AtomicFacts => f.write_str("atomic_facts"),
            IndexName::Summaries => f.write_str("summaries"),
        }
    }
}

/// Identifier + raw similarity returned by a vector search
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: RecordId,
    pub score: f32,
}

/// A record fetched by identifier
#[derive(Debug, Clone)]
pub enum StoredRecord {
    Fact(Arc<AtomicFact>),
    Summary(Arc<SummaryNode>),
}

/// Read-only query interface of the evidence store
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Top-`k` records of `index` by similarity to `embedding`, best first
    async fn vector_search(
        &self,
        embedding: &[f32],
        index: IndexName,
        k: usize,
    ) -> Result<Vec<ScoredRecord>>;

    /// Fetch a fact or summary by identifier
    async fn get_by_id(&self, id: &str) -> Result<Option<StoredRecord>>;

    /// Triplets touching `entity` (as subject or object), optionally
    /// restricted to the given relation kinds, in insertion order
    async fn get_adjacent(
        &self,
        entity: &str,
        kinds: Option<&[RelationKind]>,
    ) -> Result<Vec<Arc<RelationTriplet>>>;

    /// Display names of every entity the store knows
    async fn known_entities(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl<T: EvidenceStore + ?Sized> EvidenceStore for Arc<T> {
    async fn vector_search(
        &self,
        embedding: &[f32],
        index: IndexName,
        k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        (**self).vector_search(embedding, index, k).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredRecord>> {
        (**self).get_by_id(id).await
    }

    async fn get_adjacent(
        &self,
        entity: &str,
        kinds: Option<&[RelationKind]>,
    ) -> Result<Vec<Arc<RelationTriplet>>> {
        (**self).get_adjacent(entity, kinds).await
    }

    async fn known_entities(&self) -> Result<Vec<String>> {
        (**self).known_entities().await
    }
}

/// Cosine similarity; zero when either vector has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
