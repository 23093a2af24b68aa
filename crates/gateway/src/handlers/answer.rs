//! Question answering handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use manualqa_common::errors::{AppError, Result};
use manualqa_context::QueryResponse;

/// Answer request
#[derive(Debug, Deserialize, Validate)]
pub struct AnswerRequest {
    #[validate(length(min = 1, max = 2000))]
    pub question: String,

    /// Per-request deadline; capped at the configured query timeout
    #[serde(default)]
    #[validate(range(min = 1, max = 600000))]
    pub timeout_ms: Option<u64>,
}

/// Answer response: the engine's response plus the query id for log lookup
#[derive(Debug, Serialize)]
pub struct AnswerResponse {
    pub query_id: Uuid,

    #[serde(flatten)]
    pub response: QueryResponse,

    pub processing_time_ms: u64,
}

/// Answer a question about the manual. Refusals are a normal 200 response;
/// only malformed requests are rejected.
pub async fn answer(
    State(state): State<AppState>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>> {
    let start = Instant::now();

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let question = request.question.trim();
    if question.is_empty() {
        return Err(AppError::Validation {
            message: "question must not be blank".to_string(),
            field: Some("question".to_string()),
        });
    }

    let limit = state.engine.query_timeout();
    let deadline = request
        .timeout_ms
        .map(Duration::from_millis)
        .map_or(limit, |requested| requested.min(limit));

    let report = state.engine.answer_within(question, deadline).await;
    let processing_time_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        query_id = %report.query_id,
        refused = report.response.refusal,
        attempts = report.attempts,
        "Answer served"
    );

    Ok(Json(AnswerResponse {
        query_id: report.query_id,
        response: report.response,
        processing_time_ms,
    }))
}
