//! Evidence data model
//!
//! Stored records (facts, summaries, triplets), the per-query evidence
//! unit/bundle types built from them, and the snapshot format the
//! ingestion side hands over.

mod bundle;
mod records;
mod unit;

pub use bundle::EvidenceBundle;
pub use records::{
    normalize_entity, AtomicFact, RecordId, RelationKind, RelationTriplet, SourceLocator,
    SummaryNode,
};
pub use unit::{EvidenceKind, EvidenceOrigin, EvidencePayload, EvidenceUnit, SourceCitation};
