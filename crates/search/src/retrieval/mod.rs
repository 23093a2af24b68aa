//! Hybrid recall
//!
//! Two vector indexes are searched for every query:
//! - Atomic facts (level 0, the precise statements)
//! - Summaries (level >= 1, section overviews)
//!
//! Each list is normalized on its own and the lists are merged into one
//! ranked, deduplicated set of evidence units.

mod fusion;
mod recall;

pub use fusion::{FusedHit, ScoreFusion};
pub use recall::{HybridRecallEngine, RecallOutcome};
