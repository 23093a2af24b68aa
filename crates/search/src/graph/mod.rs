//! Relation-graph expansion
//!
//! Entities named by the question (and by the best recalled units) seed a
//! breadth-first walk over the store's relation triplets. Every edge that
//! is followed contributes the relation itself plus the facts justifying
//! it, so answers about an entity also see what it requires, conflicts
//! with and affects.

mod traversal;

pub use traversal::{preferred_kinds, GraphTraversalEngine, TraversalOutcome};
