//! ManualQA Context Engine
//!
//! Turns a question about a technical manual into either a cited answer
//! whose every sentence is backed by retrieved evidence, or a refusal.
//! Served over MCP stdio by the `manualqa-context` binary and over HTTP by
//! the gateway.

pub mod bootstrap;
pub mod engine;
pub mod mcp;
pub mod telemetry;

#[cfg(test)]
mod fixtures;

pub use bootstrap::{bootstrap, Bootstrapped};
pub use engine::{
    AnswerEngine, AnswerReport, EnginePorts, QueryResponse, RefusalReason, REFUSAL_PREFIX,
};
pub use mcp::McpServer;
pub use telemetry::{init_tracing, LogTarget};
