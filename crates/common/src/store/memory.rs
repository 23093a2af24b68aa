//! In-memory evidence store
//!
//! Records live in flat maps keyed by identifier; the summary hierarchy and
//! the relation graph are stored as identifier lists, never as pointers.
//! Vector search is a brute-force cosine scan, which is plenty for a
//! handful of manuals.

use super::snapshot::{SnapshotManifest, StoreSnapshot};
use super::{cosine_similarity, EvidenceStore, IndexName, ScoredRecord, StoredRecord};
use crate::errors::{AppError, Result};
use crate::evidence::{
    normalize_entity, AtomicFact, RecordId, RelationKind, RelationTriplet, SummaryNode,
};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Record counts, reported by readiness probes and at startup
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct StoreStats {
    pub facts: usize,
    pub summaries: usize,
    pub triplets: usize,
    pub entities: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryEvidenceStore {
    manifest: Option<SnapshotManifest>,
    dimension: Option<usize>,
    facts: BTreeMap<RecordId, Arc<AtomicFact>>,
    summaries: BTreeMap<RecordId, Arc<SummaryNode>>,
    triplets: Vec<Arc<RelationTriplet>>,
    /// Normalized entity -> indices into `triplets`, insertion order
    adjacency: HashMap<String, Vec<usize>>,
    /// Normalized entity -> first display name seen
    entities: BTreeMap<String, String>,
}

impl InMemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot, validating every record and every
    /// cross-reference
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        let StoreSnapshot {
            manifest,
            facts,
            mut summaries,
            triplets,
        } = snapshot;

        if manifest.dimension == 0 {
            return Err(AppError::Snapshot {
                message: "manifest dimension must be positive".to_string(),
            });
        }

        let mut store = Self {
            dimension: Some(manifest.dimension),
            ..Self::default()
        };

        for fact in facts {
            store.insert_fact(fact)?;
        }

        // Children must exist before their parent is linked
        summaries.sort_by_key(|s| s.level);
        for summary in summaries {
            store.insert_summary(summary)?;
        }

        for triplet in triplets {
            store.insert_triplet(triplet)?;
        }

        info!(
            document = %manifest.document,
            strategy = ?manifest.extraction_strategy,
            model = %manifest.embedding_model,
            facts = store.facts.len(),
            summaries = store.summaries.len(),
            triplets = store.triplets.len(),
            "Evidence store loaded"
        );

        store.manifest = Some(manifest);
        Ok(store)
    }

    /// Read and load a JSON snapshot file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::Snapshot {
                message: format!("cannot read {}: {}", path.display(), e),
            })?;
        let snapshot: StoreSnapshot = serde_json::from_str(&raw).map_err(|e| AppError::Snapshot {
            message: format!("cannot parse {}: {}", path.display(), e),
        })?;
        Self::from_snapshot(snapshot)
    }

    pub fn manifest(&self) -> Option<&SnapshotManifest> {
        self.manifest.as_ref()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            facts: self.facts.len(),
            summaries: self.summaries.len(),
            triplets: self.triplets.len(),
            entities: self.entities.len(),
        }
    }

    pub fn insert_fact(&mut self, fact: AtomicFact) -> Result<()> {
        fact.validate()?;
        self.check_dimension("fact", &fact.id, fact.embedding.len())?;
        self.check_unused_id("fact", &fact.id)?;

        for entity in &fact.entities {
            self.register_entity(entity);
        }
        debug!(id = %fact.id, "Inserted fact");
        self.facts.insert(fact.id.clone(), Arc::new(fact));
        Ok(())
    }

    /// Insert a summary; every child must already be stored, belong to the
    /// same section and sit at a strictly lower level
    pub fn insert_summary(&mut self, summary: SummaryNode) -> Result<()> {
        summary.validate()?;
        self.check_dimension("summary", &summary.id, summary.embedding.len())?;
        self.check_unused_id("summary", &summary.id)?;

        let invalid = |message: String| AppError::InvalidRecord {
            record_type: "summary".to_string(),
            id: summary.id.clone(),
            message,
        };

        for child in &summary.children {
            let (level, section) = if let Some(fact) = self.facts.get(child) {
                (AtomicFact::LEVEL, fact.section_id.as_str())
            } else if let Some(node) = self.summaries.get(child) {
                (node.level, node.section_id.as_str())
            } else {
                return Err(invalid(format!("unknown child '{}'", child)));
            };

            if level >= summary.level {
                return Err(invalid(format!(
                    "child '{}' at level {} is not below level {}",
                    child, level, summary.level
                )));
            }
            if section != summary.section_id {
                return Err(invalid(format!(
                    "child '{}' belongs to section '{}', not '{}'",
                    child, section, summary.section_id
                )));
            }
        }

        self.summaries.insert(summary.id.clone(), Arc::new(summary));
        Ok(())
    }

    /// Insert a triplet; every justifying fact must already be stored
    pub fn insert_triplet(&mut self, triplet: RelationTriplet) -> Result<()> {
        triplet.validate()?;

        if let Some(missing) = triplet
            .justification
            .iter()
            .find(|id| !self.facts.contains_key(*id))
        {
            return Err(AppError::InvalidRecord {
                record_type: "triplet".to_string(),
                id: triplet.id.clone(),
                message: format!("justification '{}' is not a stored fact", missing),
            });
        }
        if self.triplets.iter().any(|t| t.id == triplet.id) {
            return Err(AppError::InvalidRecord {
                record_type: "triplet".to_string(),
                id: triplet.id.clone(),
                message: "duplicate identifier".to_string(),
            });
        }

        let idx = self.triplets.len();
        self.register_entity(&triplet.subject);
        self.register_entity(&triplet.object);
        self.adjacency
            .entry(triplet.subject_key())
            .or_default()
            .push(idx);
        self.adjacency.entry(triplet.object_key()).or_default().push(idx);
        self.triplets.push(Arc::new(triplet));
        Ok(())
    }

    fn register_entity(&mut self, name: &str) {
        let key = normalize_entity(name);
        if !key.is_empty() {
            self.entities
                .entry(key)
                .or_insert_with(|| name.trim().to_string());
        }
    }

    fn check_dimension(&mut self, record_type: &str, id: &str, len: usize) -> Result<()> {
        match self.dimension {
            Some(expected) if expected != len => Err(AppError::InvalidRecord {
                record_type: record_type.to_string(),
                id: id.to_string(),
                message: format!("embedding dimension {} != {}", len, expected),
            }),
            Some(_) => Ok(()),
            None => {
                self.dimension = Some(len);
                Ok(())
            }
        }
    }

    fn check_unused_id(&self, record_type: &str, id: &str) -> Result<()> {
        if self.facts.contains_key(id) || self.summaries.contains_key(id) {
            return Err(AppError::InvalidRecord {
                record_type: record_type.to_string(),
                id: id.to_string(),
                message: "duplicate identifier".to_string(),
            });
        }
        Ok(())
    }

    fn rank<'a>(
        embedding: &[f32],
        records: impl Iterator<Item = (&'a RecordId, &'a [f32])>,
        k: usize,
    ) -> Vec<ScoredRecord> {
        let mut scored: Vec<ScoredRecord> = records
            .map(|(id, vector)| ScoredRecord {
                id: id.clone(),
                score: cosine_similarity(embedding, vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(k);
        scored
    }
}

#[async_trait]
impl EvidenceStore for InMemoryEvidenceStore {
    async fn vector_search(
        &self,
        embedding: &[f32],
        index: IndexName,
        k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        if let Some(expected) = self.dimension {
            if embedding.len() != expected {
                return Err(AppError::InvalidFormat {
                    message: format!(
                        "query embedding has dimension {}, index {} expects {}",
                        embedding.len(),
                        index,
                        expected
                    ),
                });
            }
        }

        let results = match index {
            IndexName::AtomicFacts => Self::rank(
                embedding,
                self.facts.iter().map(|(id, f)| (id, f.embedding.as_slice())),
                k,
            ),
            IndexName::Summaries => Self::rank(
                embedding,
                self.summaries
                    .iter()
                    .map(|(id, s)| (id, s.embedding.as_slice())),
                k,
            ),
        };
        Ok(results)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredRecord>> {
        if let Some(fact) = self.facts.get(id) {
            return Ok(Some(StoredRecord::Fact(fact.clone())));
        }
        Ok(self
            .summaries
            .get(id)
            .map(|s| StoredRecord::Summary(s.clone())))
    }

    async fn get_adjacent(
        &self,
        entity: &str,
        kinds: Option<&[RelationKind]>,
    ) -> Result<Vec<Arc<RelationTriplet>>> {
        let key = normalize_entity(entity);
        let Some(indices) = self.adjacency.get(&key) else {
            return Ok(Vec::new());
        };

        Ok(indices
            .iter()
            .map(|&i| &self.triplets[i])
            .filter(|t| kinds.map_or(true, |ks| ks.contains(&t.kind)))
            .cloned()
            .collect())
    }

    async fn known_entities(&self) -> Result<Vec<String>> {
        Ok(self.entities.values().cloned().collect())
    }
}
