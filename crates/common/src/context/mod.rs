//! Context Engine Core Components
//!
//! The pieces of the answering pipeline that need no store access:
//! - Query analysis (entities, intent)
//! - Prompt assembly and drafting
//! - Sentence-level confidence gating with pluggable entailment

mod confidence_gate;
mod entailment;
mod query_analyzer;
mod synthesizer;

pub use confidence_gate::{
    ConfidenceGate, ConfidenceVerdict, GateOutcome, GateState, Unsupported,
};
pub use entailment::{create_entailment, EntailmentCheck, LexicalCoverage, ModelVerifier};
pub use query_analyzer::{IntentTag, QueryAnalyzer, QueryDescriptor};
pub use synthesizer::{extract_markers, strip_markers, Citation, Draft, SynthesisAssembler};
