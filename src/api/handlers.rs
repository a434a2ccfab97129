//! HTTP request handlers

use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::schema::{BatchPayload, BatchResponse, ReviewPayload, ReviewResponse, ServiceInfo};
use crate::error::{AppError, Result};
use crate::gateway::health_check::HealthReport;
use crate::queue::batch::{BatchRequest, BatchScope};
use crate::review::types::CheckType;
use crate::AppState;

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::invalid_input(rejection.body_text()))
}

/// Count the outcome and render it
fn respond<T: serde::Serialize>(state: &AppState, outcome: Result<T>) -> Response {
    state.stats.record_outcome(outcome.is_ok());
    render(state, outcome)
}

/// Count a batch per item; a batch rejected as a whole is one failure
fn respond_batch(state: &AppState, outcome: Result<BatchResponse>) -> Response {
    match &outcome {
        Ok(response) => state
            .stats
            .record_batch(response.report.successful, response.report.failed),
        Err(_) => state.stats.record_outcome(false),
    }
    render(state, outcome)
}

fn render<T: serde::Serialize>(state: &AppState, outcome: Result<T>) -> Response {
    match outcome {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            if e.is_client_error() {
                debug!(error = %e, "Request rejected");
            } else {
                warn!(error = %e, "Request failed");
            }
            state.api_error(e).into_response()
        }
    }
}

async fn run_review(
    state: &AppState,
    payload: std::result::Result<Json<ReviewPayload>, JsonRejection>,
    only: Option<CheckType>,
) -> Result<ReviewResponse> {
    let request = body(payload)?.into_request(only)?;
    let result = state.orchestrator.review(request).await?;
    Ok(result.into())
}

async fn run_batch(
    state: &AppState,
    payload: std::result::Result<Json<BatchPayload>, JsonRejection>,
    only: Option<CheckType>,
) -> Result<BatchResponse> {
    let (items, callback_url) = body(payload)?.into_items(only)?;
    let scope = if only.is_some() {
        BatchScope::Atomic
    } else {
        BatchScope::Aggregated
    };

    let report = state
        .batches
        .process_batch(BatchRequest {
            items,
            scope,
            callback_url,
        })
        .await?;
    Ok(report.into())
}

/// `POST /v1/review`
pub async fn review(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ReviewPayload>, JsonRejection>,
) -> Response {
    let outcome = run_review(&state, payload, None).await;
    respond(&state, outcome)
}

/// `POST /v1/review/batch`
pub async fn review_batch(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<BatchPayload>, JsonRejection>,
) -> Response {
    let outcome = run_batch(&state, payload, None).await;
    respond_batch(&state, outcome)
}

/// `POST /v1/{check}`
pub async fn atomic_review(
    state: Arc<AppState>,
    payload: std::result::Result<Json<ReviewPayload>, JsonRejection>,
    check: CheckType,
) -> Response {
    let outcome = run_review(&state, payload, Some(check)).await;
    respond(&state, outcome)
}

/// `POST /v1/{check}/batch`
pub async fn atomic_batch(
    state: Arc<AppState>,
    payload: std::result::Result<Json<BatchPayload>, JsonRejection>,
    check: CheckType,
) -> Response {
    let outcome = run_batch(&state, payload, Some(check)).await;
    respond_batch(&state, outcome)
}

/// `GET /health`; a degraded service still answers 200
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.health_manager.report())
}

/// `GET /stats`
pub async fn stats(State(state): State<Arc<AppState>>) -> Response {
    let mut body = serde_json::json!(state.stats.snapshot());
    body["worker_pool"] = serde_json::json!(state.orchestrator.pool().stats());
    body["models_loaded"] = serde_json::json!(state.gateway.loaded_handles().len());
    body["model_load_attempts"] = serde_json::json!(state.gateway.load_attempts());
    Json(body).into_response()
}

/// `GET /`
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}
