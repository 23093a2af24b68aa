//! Configuration management for ManualQA services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use crate::store::ExtractionStrategy;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// HTTP gateway configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Evidence store snapshot
    #[serde(default)]
    pub store: StoreConfig,

    /// Query embedding service
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Language-generation service
    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub recall: RecallConfig,

    #[serde(default)]
    pub traversal: TraversalConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Stdio tool server
    #[serde(default)]
    pub mcp: McpConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// JSON snapshot produced by ingestion
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,

    /// Strategy the deployment expects the snapshot to have been built
    /// with; a mismatch is logged, not fatal
    #[serde(default)]
    pub extraction_strategy: ExtractionStrategy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hashing
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    #[serde(default = "default_openai_base")]
    pub base_url: String,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (hashing provider)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_ms: u64,

    /// Maximum retries
    #[serde(default = "default_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Generation provider: openai, extractive
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    pub api_key: Option<String>,

    #[serde(default = "default_openai_base")]
    pub base_url: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Timeout for a single draft request in milliseconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecallConfig {
    /// Maximum units returned by recall
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Candidates requested from each index
    #[serde(default = "default_per_index_k")]
    pub per_index_k: usize,

    /// Timeout for each index search in milliseconds
    #[serde(default = "default_search_timeout")]
    pub search_timeout_ms: u64,

    /// Raw cosine similarity below which a hit is discarded
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    #[serde(default = "default_fact_weight")]
    pub fact_weight: f32,

    #[serde(default = "default_summary_weight")]
    pub summary_weight: f32,

    /// Retries for embedding the query
    #[serde(default = "default_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TraversalConfig {
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,

    /// Edges followed per node per hop
    #[serde(default = "default_max_fanout")]
    pub max_fanout: usize,

    /// Score multiplier applied per hop
    #[serde(default = "default_hop_decay")]
    pub hop_decay: f32,

    /// Recalled units whose entities seed the traversal
    #[serde(default = "default_seed_top_n")]
    pub seed_top_n: usize,

    /// Timeout for one adjacency lookup in milliseconds
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_ms: u64,
}

/// Entailment strategy used by the confidence gate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntailmentStrategy {
    /// Content-token coverage against a single unit
    #[default]
    Lexical,
    /// YES/NO judgment from the language model
    Model,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateConfig {
    #[serde(default)]
    pub entailment: EntailmentStrategy,

    /// Fraction of a sentence's content tokens one unit must cover
    #[serde(default = "default_lexical_threshold")]
    pub lexical_threshold: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Units scoring below this never reach the prompt
    #[serde(default = "default_relevance_floor")]
    pub relevance_floor: f32,

    /// Cap on bundle size after traversal
    #[serde(default = "default_max_bundle_units")]
    pub max_bundle_units: usize,

    /// Re-drafts allowed after a failed verdict
    #[serde(default = "default_max_redrafts")]
    pub max_redrafts: u32,

    /// Whole-query deadline in milliseconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpConfig {
    /// Longest accepted request line in bytes
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,

    #[serde(default = "default_service_name")]
    pub server_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_concurrent() -> usize { 64 }
fn default_snapshot_path() -> String { "data/snapshot.json".to_string() }
fn default_embedding_provider() -> String { "hashing".to_string() }
fn default_openai_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 384 }
fn default_embedding_timeout() -> u64 { 5_000 }
fn default_retries() -> u32 { 2 }
fn default_initial_backoff() -> u64 { 100 }
fn default_generation_provider() -> String { "extractive".to_string() }
fn default_generation_model() -> String { "gpt-4o-mini".to_string() }
fn default_max_tokens() -> u32 { 1024 }
fn default_generation_timeout() -> u64 { 30_000 }
fn default_top_k() -> usize { 8 }
fn default_per_index_k() -> usize { 12 }
fn default_search_timeout() -> u64 { 1_500 }
fn default_min_similarity() -> f32 { 0.2 }
fn default_fact_weight() -> f32 { 1.0 }
fn default_summary_weight() -> f32 { 0.8 }
fn default_max_hops() -> usize { 2 }
fn default_max_fanout() -> usize { 4 }
fn default_hop_decay() -> f32 { 0.8 }
fn default_seed_top_n() -> usize { 3 }
fn default_lookup_timeout() -> u64 { 1_000 }
fn default_lexical_threshold() -> f32 { 0.6 }
fn default_relevance_floor() -> f32 { 0.05 }
fn default_max_bundle_units() -> usize { 24 }
fn default_max_redrafts() -> u32 { 1 }
fn default_query_timeout() -> u64 { 60_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "manualqa".to_string() }
fn default_max_line_bytes() -> usize { 1024 * 1024 }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__TRAVERSAL__MAX_HOPS=3
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            extraction_strategy: ExtractionStrategy::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            base_url: default_openai_base(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_ms: default_embedding_timeout(),
            max_retries: default_retries(),
            initial_backoff_ms: default_initial_backoff(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            api_key: None,
            base_url: default_openai_base(),
            model: default_generation_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_ms: default_generation_timeout(),
            max_retries: default_retries(),
            initial_backoff_ms: default_initial_backoff(),
        }
    }
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            per_index_k: default_per_index_k(),
            search_timeout_ms: default_search_timeout(),
            min_similarity: default_min_similarity(),
            fact_weight: default_fact_weight(),
            summary_weight: default_summary_weight(),
            max_retries: default_retries(),
            initial_backoff_ms: default_initial_backoff(),
        }
    }
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            max_fanout: default_max_fanout(),
            hop_decay: default_hop_decay(),
            seed_top_n: default_seed_top_n(),
            lookup_timeout_ms: default_lookup_timeout(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            entailment: EntailmentStrategy::default(),
            lexical_threshold: default_lexical_threshold(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relevance_floor: default_relevance_floor(),
            max_bundle_units: default_max_bundle_units(),
            max_redrafts: default_max_redrafts(),
            query_timeout_ms: default_query_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
            server_name: default_service_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.traversal.max_hops, 2);
        assert_eq!(config.engine.max_redrafts, 1);
        assert_eq!(config.gate.entailment, EntailmentStrategy::Lexical);
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = Config::builder()
            .set_override("traversal.max_hops", 3)
            .unwrap()
            .set_override("gate.entailment", "model")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.traversal.max_hops, 3);
        assert_eq!(config.traversal.max_fanout, 4);
        assert_eq!(config.gate.entailment, EntailmentStrategy::Model);
        assert_eq!(config.embedding.provider, "hashing");
    }
}
