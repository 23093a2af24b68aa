//! Test fixtures shared across the workspace (feature `testing`)
//!
//! - `guide_snapshot`: a small "Guide.pdf" manual with facts, summaries and
//!   a relation graph around the Reset command
//! - `FaultyStore`: wraps a store and injects failures or stalls per index

use crate::embeddings::{Embedder, HashingEmbedder};
use crate::errors::{AppError, Result};
use crate::evidence::{AtomicFact, RelationKind, RelationTriplet, SourceLocator, SummaryNode};
use crate::store::{
    EvidenceStore, ExtractionStrategy, InMemoryEvidenceStore, IndexName, ScoredRecord,
    SnapshotManifest, StoreSnapshot, StoredRecord,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const GUIDE_DOCUMENT: &str = "Guide.pdf";
pub const GUIDE_DIMENSION: usize = 512;

const FACTS: &[(&str, u32, &str, &str, &[&str])] = &[
    (
        "1.0_0",
        1,
        "1",
        "The AcmeFlow X200 is a programmable flow controller for industrial pumps.",
        &["AcmeFlow X200"],
    ),
    (
        "1.0_1",
        1,
        "1",
        "The AcmeFlow X200 supports Modbus RTU and CANopen fieldbus interfaces.",
        &["AcmeFlow X200", "Modbus RTU", "CANopen"],
    ),
    (
        "3.1_0",
        12,
        "3.1",
        "The Reset command clears the FIFO Buffer.",
        &["Reset", "FIFO Buffer"],
    ),
    (
        "3.1_1",
        12,
        "3.1",
        "The Reset command restores the Calibration Table to factory values.",
        &["Reset", "Calibration Table"],
    ),
    (
        "3.2_0",
        14,
        "3.2",
        "Firmware Flashing must not be started while a Reset is in progress.",
        &["Firmware Flashing", "Reset"],
    ),
    (
        "3.2_1",
        14,
        "3.2",
        "Firmware Flashing requires a stable Power Supply.",
        &["Firmware Flashing", "Power Supply"],
    ),
    (
        "4.1_0",
        20,
        "4.1",
        "The FIFO Buffer stores up to 512 sensor samples.",
        &["FIFO Buffer", "Sample Capacity"],
    ),
    (
        "4.1_1",
        21,
        "4.1",
        "The Calibration Table maps sensor voltage to flow rate.",
        &["Calibration Table"],
    ),
];

const SUMMARIES: &[(&str, &str, &str, &[&str])] = &[
    (
        "1_s1",
        "1",
        "Overview of the AcmeFlow X200 flow controller and its fieldbus interfaces.",
        &["1.0_0", "1.0_1"],
    ),
    (
        "3.1_s1",
        "3.1",
        "The Reset command and its effects on controller state.",
        &["3.1_0", "3.1_1"],
    ),
];

const TRIPLETS: &[(&str, &str, RelationKind, &str, &str)] = &[
    ("t1", "Reset", RelationKind::Affects, "FIFO Buffer", "3.1_0"),
    ("t2", "Reset", RelationKind::Affects, "Calibration Table", "3.1_1"),
    ("t3", "Firmware Flashing", RelationKind::ConflictsWith, "Reset", "3.2_0"),
    ("t4", "Firmware Flashing", RelationKind::Requires, "Power Supply", "3.2_1"),
    ("t5", "FIFO Buffer", RelationKind::HasParam, "Sample Capacity", "4.1_0"),
];

/// The "Guide.pdf" manual, embedded with `embedder`
pub fn guide_snapshot(embedder: &HashingEmbedder) -> StoreSnapshot {
    let facts = FACTS
        .iter()
        .map(|(id, page, section, text, entities)| AtomicFact {
            id: id.to_string(),
            text: text.to_string(),
            embedding: embedder.embed_text(text),
            document: GUIDE_DOCUMENT.to_string(),
            locator: SourceLocator::page(*page)
                .with_section(*section)
                .with_image(format!("pages/page_{:03}.png", page)),
            section_id: section.to_string(),
            entities: entities.iter().map(|e| e.to_string()).collect(),
        })
        .collect();

    let summaries = SUMMARIES
        .iter()
        .map(|(id, section, text, children)| SummaryNode {
            id: id.to_string(),
            text: text.to_string(),
            embedding: embedder.embed_text(text),
            level: 1,
            children: children.iter().map(|c| c.to_string()).collect(),
            section_id: section.to_string(),
            document: GUIDE_DOCUMENT.to_string(),
        })
        .collect();

    let triplets = TRIPLETS
        .iter()
        .map(|(id, subject, kind, object, fact)| RelationTriplet {
            id: id.to_string(),
            subject: subject.to_string(),
            kind: *kind,
            object: object.to_string(),
            justification: vec![fact.to_string()],
        })
        .collect();

    StoreSnapshot {
        manifest: SnapshotManifest {
            document: GUIDE_DOCUMENT.to_string(),
            extraction_strategy: ExtractionStrategy::TextOnly,
            embedding_model: HashingEmbedder::MODEL_NAME.to_string(),
            dimension: embedder.dimension(),
        },
        facts,
        summaries,
        triplets,
    }
}

/// Embedder and loaded store for the guide manual
pub fn guide_store() -> Result<(Arc<HashingEmbedder>, Arc<InMemoryEvidenceStore>)> {
    let embedder = Arc::new(HashingEmbedder::new(GUIDE_DIMENSION));
    let store = InMemoryEvidenceStore::from_snapshot(guide_snapshot(&embedder))?;
    Ok((embedder, Arc::new(store)))
}

/// Store wrapper that fails or stalls chosen indexes
pub struct FaultyStore<S> {
    inner: S,
    failing: Vec<IndexName>,
    stalled: Vec<IndexName>,
    stall: Duration,
    failing_adjacency: bool,
    adjacency_calls: AtomicUsize,
    lookup_delay: Option<Duration>,
    lookups_in_flight: AtomicUsize,
    peak_lookups: AtomicUsize,
}

impl<S: EvidenceStore> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing: Vec::new(),
            stalled: Vec::new(),
            stall: Duration::from_secs(30),
            failing_adjacency: false,
            adjacency_calls: AtomicUsize::new(0),
            lookup_delay: None,
            lookups_in_flight: AtomicUsize::new(0),
            peak_lookups: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, index: IndexName) -> Self {
        self.failing.push(index);
        self
    }

    pub fn stalling(mut self, index: IndexName, delay: Duration) -> Self {
        self.stalled.push(index);
        self.stall = delay;
        self
    }

    pub fn failing_adjacency(mut self) -> Self {
        self.failing_adjacency = true;
        self
    }

    pub fn adjacency_calls(&self) -> usize {
        self.adjacency_calls.load(Ordering::SeqCst)
    }

    /// Delay every record lookup by `delay`
    pub fn slow_lookups(mut self, delay: Duration) -> Self {
        self.lookup_delay = Some(delay);
        self
    }

    /// Most record lookups ever in flight at once
    pub fn peak_lookups(&self) -> usize {
        self.peak_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: EvidenceStore> EvidenceStore for FaultyStore<S> {
    async fn vector_search(
        &self,
        embedding: &[f32],
        index: IndexName,
        k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        if self.failing.contains(&index) {
            return Err(AppError::ServiceUnavailable {
                message: format!("index {} offline", index),
            });
        }
        if self.stalled.contains(&index) {
            tokio::time::sleep(self.stall).await;
        }
        self.inner.vector_search(embedding, index, k).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredRecord>> {
        let in_flight = self.lookups_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_lookups.fetch_max(in_flight, Ordering::SeqCst);
        if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }
        let record = self.inner.get_by_id(id).await;
        self.lookups_in_flight.fetch_sub(1, Ordering::SeqCst);
        record
    }

    async fn get_adjacent(
        &self,
        entity: &str,
        kinds: Option<&[RelationKind]>,
    ) -> Result<Vec<Arc<RelationTriplet>>> {
        self.adjacency_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_adjacency {
            return Err(AppError::ServiceUnavailable {
                message: "graph offline".to_string(),
            });
        }
        self.inner.get_adjacent(entity, kinds).await
    }

    async fn known_entities(&self) -> Result<Vec<String>> {
        self.inner.known_entities().await
    }
}
