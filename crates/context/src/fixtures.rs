//! Engine wiring shared by unit tests

use crate::engine::{AnswerEngine, EnginePorts};
use manualqa_common::config::AppConfig;
use manualqa_common::testing::{guide_store, GUIDE_DIMENSION};
use manualqa_common::{EvidenceStore, LanguageModel};
use std::sync::Arc;

/// Defaults with fast retries, sized for the guide manual
pub(crate) fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.embedding.dimension = GUIDE_DIMENSION;
    config.recall.initial_backoff_ms = 1;
    config.generation.initial_backoff_ms = 1;
    config
}

/// Engine over the guide manual with the given model
pub(crate) async fn guide_engine(model: Arc<dyn LanguageModel>) -> AnswerEngine {
    let (_, store) = guide_store().unwrap();
    engine_over(test_config(), store, model).await
}

/// Engine over any store, embedding with the guide's hashing embedder
pub(crate) async fn engine_over(
    config: AppConfig,
    store: Arc<dyn EvidenceStore>,
    model: Arc<dyn LanguageModel>,
) -> AnswerEngine {
    let (embedder, _) = guide_store().unwrap();
    let ports = EnginePorts {
        store,
        embedder,
        model,
    };
    AnswerEngine::new(&config, ports).await.unwrap()
}
