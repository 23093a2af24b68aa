//! ManualQA Search
//!
//! Evidence gathering for one query:
//! - Hybrid recall over the atomic-fact and summary indexes
//! - Bounded multi-hop expansion over the relation graph

pub mod graph;
pub mod retrieval;

pub use graph::{GraphTraversalEngine, TraversalOutcome};
pub use retrieval::{HybridRecallEngine, RecallOutcome};
