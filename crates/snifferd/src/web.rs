//! HTTP endpoints for snifferd.
//!
//! Thin request layer over `CaptureService`: every handler maps straight to
//! one service operation and returns JSON.

use crate::device::CaptureConfig;
use crate::error::CaptureError;
use crate::service::{records, CaptureService};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

/// Shared state for web handlers
#[derive(Clone)]
pub struct WebState {
    pub service: Arc<CaptureService>,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(serve_root))
        .route("/start/{id}", get(start_task))
        .route("/stop/{id}", get(stop_task))
        .route("/status/{id}", get(task_status))
        .route("/tasks", get(list_tasks))
        .route("/config", get(get_config).put(put_config))
        .route("/health", get(health))
        .with_state(state)
}

fn error_response(e: CaptureError) -> Response {
    let status = match &e {
        CaptureError::DuplicateTask(_) | CaptureError::TaskAlreadyStopped(_) => StatusCode::CONFLICT,
        CaptureError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        CaptureError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        CaptureError::Invariant(_) | CaptureError::Spawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if !e.is_client_error() {
        error!(error = %e, "Capture request failed");
    }
    (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
}

/// Controller model and every finished task.
async fn serve_root(State(state): State<WebState>) -> impl IntoResponse {
    let finished = state.service.list_finished();
    Json(serde_json::json!({
        "name": "snifferd",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.service.get_controller_model(),
        "finished": records(&state.service, &finished),
    }))
}

#[derive(Debug, Deserialize)]
struct StartQuery {
    owner: Option<String>,
    host: Option<String>,
}

#[tracing::instrument(name = "http.task.start", skip(state))]
async fn start_task(
    State(state): State<WebState>,
    Path(id): Path<String>,
    Query(query): Query<StartQuery>,
) -> Response {
    let owner = query.owner.as_deref().unwrap_or("unknown");
    let host = query.host.as_deref().unwrap_or("unknown");
    match state.service.start_new_task(&id, owner, host) {
        Ok(task) => Json(state.service.record(&task)).into_response(),
        Err(e) => error_response(e),
    }
}

#[tracing::instrument(name = "http.task.stop", skip(state))]
async fn stop_task(State(state): State<WebState>, Path(id): Path<String>) -> Response {
    match state.service.stop_task(&id) {
        Ok(task) => Json(state.service.record(&task)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn task_status(State(state): State<WebState>, Path(id): Path<String>) -> Response {
    match state.service.get_task_by_id(&id) {
        Ok(task) => Json(state.service.record(&task)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_tasks(State(state): State<WebState>) -> impl IntoResponse {
    let service = &state.service;
    Json(serde_json::json!({
        "running": records(service, &service.list_running()),
        "pending": records(service, &service.list_pending()),
        "finished": records(service, &service.list_finished()),
    }))
}

async fn get_config(State(state): State<WebState>) -> impl IntoResponse {
    Json(state.service.get_capture_config())
}

#[tracing::instrument(name = "http.config.set", skip(state))]
async fn put_config(State(state): State<WebState>, Json(config): Json<CaptureConfig>) -> Response {
    match state.service.set_capture_config(config) {
        Ok(()) => Json(state.service.get_capture_config()).into_response(),
        Err(e) => error_response(e),
    }
}

async fn health(State(state): State<WebState>) -> impl IntoResponse {
    let stats = state.service.stats();
    let status = if stats.shutting_down {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(serde_json::json!({
            "status": if stats.shutting_down { "shutting_down" } else { "healthy" },
            "model": state.service.get_controller_model(),
            "stats": stats,
        })),
    )
}
