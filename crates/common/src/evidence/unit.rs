//! Evidence units - the common currency between recall, traversal and synthesis

use super::records::{AtomicFact, RecordId, RelationTriplet, SourceLocator, SummaryNode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Document + locator a unit can be cited by
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SourceCitation {
    /// Record the citation points at (fact, summary or triplet id)
    pub record_id: RecordId,

    /// Source document identifier
    pub document: String,

    pub locator: SourceLocator,
}

impl SourceCitation {
    /// Short label used in prompts, e.g. "Guide.pdf, page 1"
    pub fn label(&self) -> String {
        format!("{}, {}", self.document, self.locator)
    }
}

/// Which stage produced a unit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum EvidenceOrigin {
    /// Atomic-fact vector index
    FactIndex,
    /// Hierarchical summary index
    SummaryIndex,
    /// Relation-graph expansion at the given hop (1-based)
    Graph { hop: usize },
}

/// Record carried by a unit; shared, never mutated
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "record", rename_all = "snake_case")]
pub enum EvidencePayload {
    Fact(Arc<AtomicFact>),
    Summary(Arc<SummaryNode>),
    Relation(Arc<RelationTriplet>),
}

/// Coarse kind of a unit, used for ordering and rendering
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Fact,
    Relation,
    Summary,
}

/// A retrieved, scored, citable piece of evidence
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceUnit {
    pub payload: EvidencePayload,

    /// Relevance score (0.0 - 1.0)
    pub score: f32,

    pub citation: SourceCitation,

    pub origin: EvidenceOrigin,
}

impl EvidenceUnit {
    pub fn fact(fact: Arc<AtomicFact>, score: f32, origin: EvidenceOrigin) -> Self {
        let citation = SourceCitation {
            record_id: fact.id.clone(),
            document: fact.document.clone(),
            locator: fact.locator.clone(),
        };
        Self {
            payload: EvidencePayload::Fact(fact),
            score,
            citation,
            origin,
        }
    }

    pub fn summary(summary: Arc<SummaryNode>, score: f32) -> Self {
        let citation = SourceCitation {
            record_id: summary.id.clone(),
            document: summary.document.clone(),
            locator: summary.locator(),
        };
        Self {
            payload: EvidencePayload::Summary(summary),
            score,
            citation,
            origin: EvidenceOrigin::SummaryIndex,
        }
    }

    /// A relation unit is cited through the first fact that justifies it
    pub fn relation(
        triplet: Arc<RelationTriplet>,
        justified_by: &AtomicFact,
        score: f32,
        hop: usize,
    ) -> Self {
        let citation = SourceCitation {
            record_id: triplet.id.clone(),
            document: justified_by.document.clone(),
            locator: justified_by.locator.clone(),
        };
        Self {
            payload: EvidencePayload::Relation(triplet),
            score,
            citation,
            origin: EvidenceOrigin::Graph { hop },
        }
    }

    /// Bundle-wide identity; identical underlying records share a key
    pub fn key(&self) -> String {
        match &self.payload {
            EvidencePayload::Fact(f) => format!("fact:{}", f.id),
            EvidencePayload::Summary(s) => format!("summary:{}", s.id),
            EvidencePayload::Relation(r) => format!("relation:{}", r.id),
        }
    }

    pub fn kind(&self) -> EvidenceKind {
        match &self.payload {
            EvidencePayload::Fact(_) => EvidenceKind::Fact,
            EvidencePayload::Summary(_) => EvidenceKind::Summary,
            EvidencePayload::Relation(_) => EvidenceKind::Relation,
        }
    }

    /// Text the unit asserts
    pub fn text(&self) -> String {
        match &self.payload {
            EvidencePayload::Fact(f) => f.text.clone(),
            EvidencePayload::Summary(s) => s.text.clone(),
            EvidencePayload::Relation(r) => r.describe(),
        }
    }

    /// Entity names the unit mentions
    pub fn entities(&self) -> Vec<String> {
        match &self.payload {
            EvidencePayload::Fact(f) => f.entities.clone(),
            EvidencePayload::Summary(_) => Vec::new(),
            EvidencePayload::Relation(r) => vec![r.subject.clone(), r.object.clone()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::RelationKind;

    fn reset_fact() -> Arc<AtomicFact> {
        Arc::new(AtomicFact {
            id: "3.1_0".to_string(),
            text: "The Reset command clears the FIFO Buffer.".to_string(),
            embedding: vec![1.0],
            document: "Guide.pdf".to_string(),
            locator: SourceLocator::page(12).with_section("3.1"),
            section_id: "3.1".to_string(),
            entities: vec!["Reset".to_string(), "FIFO Buffer".to_string()],
        })
    }

    #[test]
    fn test_keys_are_namespaced() {
        let fact = EvidenceUnit::fact(reset_fact(), 0.9, EvidenceOrigin::FactIndex);
        assert_eq!(fact.key(), "fact:3.1_0");
        assert_eq!(fact.citation.label(), "Guide.pdf, page 12, section 3.1");
    }

    #[test]
    fn test_relation_cites_justifying_fact_location() {
        let source = reset_fact();
        let triplet = Arc::new(RelationTriplet {
            id: "r1".to_string(),
            subject: "Reset".to_string(),
            kind: RelationKind::Affects,
            object: "FIFO Buffer".to_string(),
            justification: vec![source.id.clone()],
        });
        let unit = EvidenceUnit::relation(triplet, &source, 0.5, 1);

        assert_eq!(unit.key(), "relation:r1");
        assert_eq!(unit.citation.document, "Guide.pdf");
        assert_eq!(unit.citation.locator.page, Some(12));
        assert_eq!(unit.text(), "Reset affects FIFO Buffer");
        assert_eq!(unit.origin, EvidenceOrigin::Graph { hop: 1 });
    }
}
