//! Ingestion snapshot format

use crate::evidence::{AtomicFact, RelationTriplet, SummaryNode};
use serde::{Deserialize, Serialize};

/// How the ingestion side turned pages into text.
///
/// A fixed set of named strategies; the snapshot records which one
/// produced its facts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Plain text extraction for every page
    #[default]
    TextOnly,
    /// Text extraction, switching to page vision when a figure or table
    /// caption is detected
    VisionOnFigures,
    /// Page vision for every page
    FullPageVision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    /// Manual the snapshot was built from
    pub document: String,

    #[serde(default)]
    pub extraction_strategy: ExtractionStrategy,

    /// Model that produced the stored embeddings
    pub embedding_model: String,

    /// Dimension of every stored embedding
    pub dimension: usize,
}

/// Everything the store serves, as handed over by ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub manifest: SnapshotManifest,

    #[serde(default)]
    pub facts: Vec<AtomicFact>,

    #[serde(default)]
    pub summaries: Vec<SummaryNode>,

    #[serde(default)]
    pub triplets: Vec<RelationTriplet>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_defaults_strategy() {
        let json = r#"{
            "manifest": {"document": "Guide.pdf", "embedding_model": "hashing", "dimension": 4}
        }"#;
        let snapshot: StoreSnapshot = serde_json::from_str(json).unwrap();

        assert_eq!(snapshot.manifest.extraction_strategy, ExtractionStrategy::TextOnly);
        assert!(snapshot.facts.is_empty());
    }

    #[test]
    fn test_strategy_names() {
        let strategy: ExtractionStrategy = serde_json::from_str("\"vision_on_figures\"").unwrap();
        assert_eq!(strategy, ExtractionStrategy::VisionOnFigures);
    }
}
