//! Stored evidence records: atomic facts, summary nodes, relation triplets
//!
//! Records are immutable once stored and reference each other only by
//! identifier, so the summary hierarchy and the relation graph never form
//! ownership cycles.

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a fact or summary record (e.g. `"2.2.2_0"`)
pub type RecordId = String;

/// Pronouns that may not open an atomic fact; coreference resolution
/// upstream is expected to have replaced them with entity names.
const DANGLING_PRONOUNS: &[&str] = &["it", "its", "they", "them", "their", "he", "she"];

/// Canonical identity of an entity name.
///
/// Trims, lowercases and collapses inner whitespace, so `" FIFO  Buffer"`
/// and `"fifo buffer"` are the same graph node.
pub fn normalize_entity(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Where in a source document a record came from
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SourceLocator {
    /// 1-indexed page number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    /// Section identifier (e.g. "2.2.2")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    /// Rendered page image, relative to the snapshot's asset root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl SourceLocator {
    pub fn page(page: u32) -> Self {
        Self {
            page: Some(page),
            ..Self::default()
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.page, &self.section) {
            (Some(p), Some(s)) => write!(f, "page {}, section {}", p, s),
            (Some(p), None) => write!(f, "page {}", p),
            (None, Some(s)) => write!(f, "section {}", s),
            (None, None) => write!(f, "unlocated"),
        }
    }
}

/// A single self-contained, coreference-resolved proposition (level 0)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AtomicFact {
    pub id: RecordId,

    /// Resolved proposition text
    pub text: String,

    #[serde(default)]
    pub embedding: Vec<f32>,

    /// Source document identifier (e.g. "Guide.pdf")
    pub document: String,

    pub locator: SourceLocator,

    /// Section this fact belongs to
    pub section_id: String,

    /// Entity names mentioned by the fact
    #[serde(default)]
    pub entities: Vec<String>,
}

impl AtomicFact {
    /// Hierarchy level of every atomic fact
    pub const LEVEL: u8 = 0;

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| AppError::InvalidRecord {
            record_type: "fact".to_string(),
            id: self.id.clone(),
            message: message.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("empty identifier"));
        }
        if self.text.trim().is_empty() {
            return Err(invalid("empty text"));
        }
        if self.embedding.is_empty() {
            return Err(invalid("missing embedding"));
        }
        if self.document.trim().is_empty() {
            return Err(invalid("missing source document"));
        }

        let first_word = self
            .text
            .split_whitespace()
            .next()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .unwrap_or_default();
        if DANGLING_PRONOUNS.contains(&first_word.as_str()) {
            return Err(invalid("text opens with an unresolved pronoun"));
        }

        Ok(())
    }
}

/// Higher-level synthesis over facts or lower summaries of one section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryNode {
    pub id: RecordId,
    pub text: String,

    #[serde(default)]
    pub embedding: Vec<f32>,

    /// Hierarchy level, always >= 1
    pub level: u8,

    /// Child facts or lower-level summaries
    pub children: Vec<RecordId>,

    pub section_id: String,

    pub document: String,
}

impl SummaryNode {
    /// Local checks; cross-record checks (same section, lower child level)
    /// happen when the store links the tree.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| AppError::InvalidRecord {
            record_type: "summary".to_string(),
            id: self.id.clone(),
            message: message.to_string(),
        };

        if self.level == 0 {
            return Err(invalid("summary level must be at least 1"));
        }
        if self.children.is_empty() {
            return Err(invalid("summary has no children"));
        }
        if self.children.iter().any(|c| c == &self.id) {
            return Err(invalid("summary lists itself as a child"));
        }
        if self.embedding.is_empty() {
            return Err(invalid("missing embedding"));
        }
        Ok(())
    }

    pub fn locator(&self) -> SourceLocator {
        SourceLocator::default().with_section(self.section_id.clone())
    }
}

/// Closed set of relation kinds the atomizer emits
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    /// Subject needs object to be present or done first
    Requires,
    /// Subject must not be combined with object
    ConflictsWith,
    /// Subject changes the state of object
    Affects,
    /// Subject defines object
    Defines,
    /// Subject has object as a parameter
    HasParam,
}

impl RelationKind {
    pub const ALL: [RelationKind; 5] = [
        RelationKind::Requires,
        RelationKind::ConflictsWith,
        RelationKind::Affects,
        RelationKind::Defines,
        RelationKind::HasParam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Requires => "REQUIRES",
            RelationKind::ConflictsWith => "CONFLICTS_WITH",
            RelationKind::Affects => "AFFECTS",
            RelationKind::Defines => "DEFINES",
            RelationKind::HasParam => "HAS_PARAM",
        }
    }

    /// Human phrasing used when a triplet is rendered as evidence text
    pub fn phrase(&self) -> &'static str {
        match self {
            RelationKind::Requires => "requires",
            RelationKind::ConflictsWith => "conflicts with",
            RelationKind::Affects => "affects",
            RelationKind::Defines => "defines",
            RelationKind::HasParam => "has parameter",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_uppercase().replace([' ', '-'], "_");
        RelationKind::ALL
            .into_iter()
            .find(|k| k.as_str() == key)
            .ok_or_else(|| AppError::InvalidFormat {
                message: format!("unknown relation kind '{}'", s),
            })
    }
}

/// Directed, evidence-backed edge between two entities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationTriplet {
    pub id: RecordId,
    pub subject: String,
    pub kind: RelationKind,
    pub object: String,

    /// Facts that justify this relation
    pub justification: Vec<RecordId>,
}

impl RelationTriplet {
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| AppError::InvalidRecord {
            record_type: "triplet".to_string(),
            id: self.id.clone(),
            message: message.to_string(),
        };

        let subject = normalize_entity(&self.subject);
        let object = normalize_entity(&self.object);
        if subject.is_empty() || object.is_empty() {
            return Err(invalid("empty endpoint"));
        }
        if subject == object {
            return Err(invalid("subject and object are the same entity"));
        }
        if self.justification.is_empty() {
            return Err(invalid("relation has no justifying fact"));
        }
        Ok(())
    }

    pub fn subject_key(&self) -> String {
        normalize_entity(&self.subject)
    }

    pub fn object_key(&self) -> String {
        normalize_entity(&self.object)
    }

    /// The endpoint opposite to `entity_key`, if the triplet touches it
    pub fn other_end(&self, entity_key: &str) -> Option<&str> {
        if self.subject_key() == entity_key {
            Some(&self.object)
        } else if self.object_key() == entity_key {
            Some(&self.subject)
        } else {
            None
        }
    }

    /// Sentence form, e.g. "Reset conflicts with Firmware Flashing"
    pub fn describe(&self) -> String {
        format!("{} {} {}", self.subject, self.kind.phrase(), self.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(text: &str) -> AtomicFact {
        AtomicFact {
            id: "1.0_0".to_string(),
            text: text.to_string(),
            embedding: vec![1.0, 0.0],
            document: "Guide.pdf".to_string(),
            locator: SourceLocator::page(1),
            section_id: "1.0".to_string(),
            entities: vec![],
        }
    }

    #[test]
    fn test_normalize_entity() {
        assert_eq!(normalize_entity("  FIFO   Buffer "), "fifo buffer");
        assert_eq!(normalize_entity("Reset"), "reset");
    }

    #[test]
    fn test_locator_image_is_optional() {
        let plain: SourceLocator = serde_json::from_str(r#"{"page":3,"section":"2.1"}"#).unwrap();
        assert_eq!(plain, SourceLocator::page(3).with_section("2.1"));
        assert!(!serde_json::to_string(&plain).unwrap().contains("image"));

        let imaged = SourceLocator::page(3).with_image("pages/page_003.png");
        let json = serde_json::to_value(&imaged).unwrap();
        assert_eq!(json["image"], "pages/page_003.png");
        assert_eq!(imaged.to_string(), "page 3");
    }

    #[test]
    fn test_fact_rejects_leading_pronoun() {
        assert!(fact("It clears the FIFO buffer.").validate().is_err());
        assert!(fact("The Reset command clears the FIFO buffer.").validate().is_ok());
    }

    #[test]
    fn test_triplet_rejects_self_loop() {
        let triplet = RelationTriplet {
            id: "t1".to_string(),
            subject: "Reset".to_string(),
            kind: RelationKind::Affects,
            object: " reset ".to_string(),
            justification: vec!["1.0_0".to_string()],
        };
        assert!(triplet.validate().is_err());
    }

    #[test]
    fn test_triplet_requires_justification() {
        let triplet = RelationTriplet {
            id: "t1".to_string(),
            subject: "Reset".to_string(),
            kind: RelationKind::Affects,
            object: "FIFO Buffer".to_string(),
            justification: vec![],
        };
        assert!(triplet.validate().is_err());
    }

    #[test]
    fn test_relation_kind_parsing() {
        assert_eq!("conflicts with".parse::<RelationKind>().unwrap(), RelationKind::ConflictsWith);
        assert_eq!("HAS_PARAM".parse::<RelationKind>().unwrap(), RelationKind::HasParam);
        assert!("LIKES".parse::<RelationKind>().is_err());
    }

    #[test]
    fn test_other_end() {
        let triplet = RelationTriplet {
            id: "t1".to_string(),
            subject: "Reset".to_string(),
            kind: RelationKind::ConflictsWith,
            object: "Firmware Flashing".to_string(),
            justification: vec!["1.0_0".to_string()],
        };
        assert_eq!(triplet.other_end("reset"), Some("Firmware Flashing"));
        assert_eq!(triplet.other_end("firmware flashing"), Some("Reset"));
        assert_eq!(triplet.other_end("fifo buffer"), None);
    }

    #[test]
    fn test_summary_validation() {
        let summary = SummaryNode {
            id: "s1".to_string(),
            text: "Section overview".to_string(),
            embedding: vec![0.5],
            level: 1,
            children: vec![],
            section_id: "1.0".to_string(),
            document: "Guide.pdf".to_string(),
        };
        assert!(summary.validate().is_err());
    }
}
