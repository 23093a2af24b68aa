//! Build a ready-to-serve engine from configuration

use crate::engine::{AnswerEngine, EnginePorts};
use manualqa_common::config::AppConfig;
use manualqa_common::embeddings::create_embedder;
use manualqa_common::errors::{AppError, Result};
use manualqa_common::generation::create_language_model;
use manualqa_common::store::{InMemoryEvidenceStore, SnapshotManifest, StoreStats};
use std::sync::Arc;
use tracing::{info, warn};

/// Engine plus what was loaded to build it
pub struct Bootstrapped {
    pub engine: AnswerEngine,
    pub stats: StoreStats,
    pub manifest: Option<SnapshotManifest>,
}

/// Load the snapshot, create the embedding and generation ports and wire
/// the engine. Fails if the snapshot was embedded with a different
/// dimension than the configured embedder produces.
pub async fn bootstrap(config: &AppConfig) -> Result<Bootstrapped> {
    let store = InMemoryEvidenceStore::load(&config.store.snapshot_path).await?;
    let stats = store.stats();
    let manifest = store.manifest().cloned();

    let embedder = create_embedder(&config.embedding)?;
    if let Some(manifest) = &manifest {
        if manifest.dimension != embedder.dimension() {
            return Err(AppError::Configuration {
                message: format!(
                    "snapshot embeddings have dimension {} but embedder '{}' produces {}",
                    manifest.dimension,
                    embedder.model_name(),
                    embedder.dimension()
                ),
            });
        }
        if manifest.embedding_model != embedder.model_name() {
            warn!(
                snapshot_model = %manifest.embedding_model,
                embedder = embedder.model_name(),
                "Snapshot was embedded with a different model"
            );
        }
        if manifest.extraction_strategy != config.store.extraction_strategy {
            warn!(
                snapshot = ?manifest.extraction_strategy,
                configured = ?config.store.extraction_strategy,
                "Snapshot extraction strategy differs from configuration"
            );
        }
    }

    let model = create_language_model(&config.generation)?;
    info!(
        snapshot = %config.store.snapshot_path,
        facts = stats.facts,
        summaries = stats.summaries,
        triplets = stats.triplets,
        "Evidence snapshot ready"
    );

    let ports = EnginePorts {
        store: Arc::new(store),
        embedder,
        model,
    };
    let engine = AnswerEngine::new(config, ports).await?;

    Ok(Bootstrapped {
        engine,
        stats,
        manifest,
    })
}
