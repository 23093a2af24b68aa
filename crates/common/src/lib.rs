//! ManualQA Common Library
//!
//! Shared code for the ManualQA crates including:
//! - Evidence data model (facts, summaries, triplets, bundles)
//! - Evidence store port and the in-memory snapshot store
//! - Embedding and language-generation ports
//! - Query analysis, synthesis and the confidence gate
//! - Error types, configuration, metrics

pub mod config;
pub mod context;
pub mod embeddings;
pub mod errors;
pub mod evidence;
pub mod generation;
pub mod metrics;
pub mod resilience;
pub mod store;
pub mod text;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use generation::LanguageModel;
pub use store::EvidenceStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP protocol revision spoken by the stdio server
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
