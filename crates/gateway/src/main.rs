//! ManualQA API Gateway
//!
//! HTTP front for the answer engine.
//! Handles:
//! - Question answering (`POST /v1/answer`)
//! - Liveness and readiness probes
//! - Prometheus scraping
//! - Request ids, tracing and per-route request metrics

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use manualqa_common::{
    config::AppConfig,
    metrics::{self, LATENCY_BUCKETS},
    store::StoreStats,
};
use manualqa_context::{bootstrap, init_tracing, AnswerEngine, LogTarget};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<AnswerEngine>,
    pub stats: StoreStats,
    pub document: Option<Arc<str>>,
    pub prometheus: PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.observability, LogTarget::Stdout)?;

    info!("Starting ManualQA API Gateway v{}", manualqa_common::VERSION);

    // Initialize metrics
    let prometheus = PrometheusBuilder::new()
        .set_buckets(LATENCY_BUCKETS)?
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    metrics::register_metrics();

    // Load evidence and wire the engine
    let ready = bootstrap(&config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to initialise answer engine");
        e
    })?;

    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        engine: Arc::new(ready.engine),
        stats: ready.stats,
        document: ready.manifest.map(|m| Arc::from(m.document)),
        prometheus,
    };

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let max_concurrent = state.config.server.max_concurrent_requests.max(1);

    let api_routes = Router::new()
        .route("/answer", post(handlers::answer::answer))
        .layer(ConcurrencyLimitLayer::new(max_concurrent));

    Router::new()
        .nest("/v1", api_routes)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/metrics", get(handlers::health::metrics))
        .layer(axum::middleware::from_fn(middleware::metrics::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use manualqa_common::generation::ExtractiveGenerator;
    use manualqa_common::testing::{guide_store, GUIDE_DIMENSION, GUIDE_DOCUMENT};
    use manualqa_context::EnginePorts;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let mut config = AppConfig::default();
        config.embedding.dimension = GUIDE_DIMENSION;

        let (embedder, store) = tokio_test::assert_ok!(guide_store());
        let stats = store.stats();
        let ports = EnginePorts {
            store,
            embedder,
            model: Arc::new(ExtractiveGenerator::default()),
        };
        let engine = AnswerEngine::new(&config, ports).await.unwrap();

        create_router(AppState {
            config: Arc::new(config),
            engine: Arc::new(engine),
            stats,
            document: Some(Arc::from(GUIDE_DOCUMENT)),
            prometheus: PrometheusBuilder::new().build_recorder().handle(),
        })
    }

    async fn post_answer(app: Router, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::post("/v1/answer")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_answer_endpoint_returns_cited_answer() {
        let (status, body) =
            post_answer(test_app().await, json!({"question": "What is the AcmeFlow X200?"}))
                .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["answer"].as_str().unwrap().contains("[1]"));
        assert!(body.get("refusal").is_none());
        assert_eq!(body["citations"][0]["document"], GUIDE_DOCUMENT);
        assert!(body["query_id"].is_string());
    }

    #[tokio::test]
    async fn test_refusal_is_a_normal_response() {
        let (status, body) = post_answer(
            test_app().await,
            json!({"question": "What is the capital of Mars?"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["refusal"], true);
        assert_eq!(body["citations"], json!([]));
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with(manualqa_context::REFUSAL_PREFIX));
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let (status, body) = post_answer(test_app().await, json!({"question": ""})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, _) = post_answer(test_app().await, json!({"question": "   "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_probes() {
        let app = test_app().await;

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"]["evidence"]["stats"]["facts"], 8);
    }
}
