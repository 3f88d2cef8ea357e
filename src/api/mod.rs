//! REST endpoints + WebSocket event stream for the console.

pub mod ws;

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use secrecy::SecretString;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::connectors::ConnectorId;
use crate::console::Console;
use crate::error::{ConnectorError, PipelineError};
use crate::tasks::TaskStatus;

#[derive(Clone)]
pub struct AppState {
    pub console: Arc<Console>,
}

pub fn routes(console: Arc<Console>) -> Router {
    let state = AppState { console };

    Router::new()
        .route("/health", get(health))
        .route("/ws/events", get(ws::ws_handler))
        .route("/api/tasks", get(list_tasks).delete(clear_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/process", post(process_task))
        .route("/api/tasks/{id}/retry", post(retry_task))
        .route("/api/dispatch", post(dispatch))
        .route("/api/trace", get(get_trace))
        .route("/api/connectors", get(list_connectors))
        .route("/api/connectors/{id}/connect", post(connect))
        .route("/api/connectors/{id}/disconnect", post(disconnect))
        .route("/api/connectors/{id}/auto", post(set_auto))
        .route("/api/credential", put(set_credential))
        .route("/api/backend", get(backend))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn pipeline_error(e: PipelineError) -> Response {
    if e.is_rejection() {
        debug!(error = %e, "Submission rejected");
    }
    let status = match e {
        PipelineError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::Busy | PipelineError::InvalidTransition { .. } => StatusCode::CONFLICT,
        PipelineError::Stage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error(status, e.to_string())
}

fn connector_error(e: ConnectorError) -> Response {
    error(StatusCode::CONFLICT, e.to_string())
}

fn parse_connector(raw: &str) -> Result<ConnectorId, Response> {
    raw.parse::<ConnectorId>()
        .map_err(|e| error(StatusCode::BAD_REQUEST, e.to_string()))
}

/// Parse an optional JSON body; an empty body yields the default.
fn optional_body<T: for<'de> Deserialize<'de> + Default>(body: &Bytes) -> Result<T, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| error(StatusCode::BAD_REQUEST, format!("Invalid body: {e}")))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ops-console",
        "ingest": state.console.dedup_counts()
    }))
}

// ── Tasks ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TaskFilter {
    status: Option<TaskStatus>,
    source: Option<String>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(filter): Query<TaskFilter>,
) -> Response {
    let source = match filter.source.as_deref().map(parse_connector).transpose() {
        Ok(source) => source,
        Err(response) => return response,
    };
    let store = state.console.store();
    // A connector's pending queue is listed in processing order.
    if let (Some(TaskStatus::Pending), Some(source)) = (filter.status, source) {
        return Json(store.pending_for(source).await).into_response();
    }
    let tasks: Vec<_> = store
        .list()
        .await
        .into_iter()
        .filter(|t| filter.status.is_none_or(|s| t.status == s))
        .filter(|t| source.is_none_or(|s| t.source == s))
        .collect();
    Json(tasks).into_response()
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.console.store().get(&id).await {
        Some(task) => Json(task).into_response(),
        None => error(StatusCode::NOT_FOUND, format!("Task {id} not found")),
    }
}

async fn clear_tasks(State(state): State<AppState>) -> impl IntoResponse {
    let removed = state.console.clear_tasks().await;
    Json(serde_json::json!({ "removed": removed }))
}

#[derive(Debug, Deserialize)]
struct DispatchRequest {
    source: String,
    content: String,
    #[serde(default)]
    sender: Option<String>,
}

async fn dispatch(State(state): State<AppState>, Json(body): Json<DispatchRequest>) -> Response {
    let source = match parse_connector(&body.source) {
        Ok(source) => source,
        Err(response) => return response,
    };
    match state
        .console
        .dispatch(source, body.sender, &body.content)
        .await
    {
        Some(task) => {
            info!(task_id = %task.id, source = %source, "Signal dispatched");
            (StatusCode::CREATED, Json(task)).into_response()
        }
        None => {
            debug!(source = %source, "Blank dispatch ignored");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

async fn process_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.console.process(&id).await {
        Ok(task) => (StatusCode::ACCEPTED, Json(task)).into_response(),
        Err(e) => pipeline_error(e),
    }
}

async fn retry_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.console.retry(&id).await {
        Ok(task) => (StatusCode::ACCEPTED, Json(task)).into_response(),
        Err(e) => pipeline_error(e),
    }
}

// ── Trace ───────────────────────────────────────────────────────────────

async fn get_trace(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.console.trace().entries().await)
}

// ── Connectors ──────────────────────────────────────────────────────────

async fn list_connectors(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.console.registry().list().await)
}

#[derive(Debug, Default, Deserialize)]
struct ConnectRequest {
    #[serde(default)]
    credential: Option<String>,
}

async fn connect(State(state): State<AppState>, Path(id): Path<String>, body: Bytes) -> Response {
    let id = match parse_connector(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let request: ConnectRequest = match optional_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let credential = request
        .credential
        .filter(|c| !c.trim().is_empty())
        .map(SecretString::from);

    match state.console.connect(id, credential).await {
        Ok(connector) => Json(connector.summary()).into_response(),
        Err(e @ ConnectorError::CredentialRequired(_)) => {
            error(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => connector_error(e),
    }
}

async fn disconnect(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_connector(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    Json(state.console.disconnect(id).await.summary()).into_response()
}

#[derive(Debug, Deserialize)]
struct AutoRequest {
    enabled: bool,
}

async fn set_auto(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AutoRequest>,
) -> Response {
    let id = match parse_connector(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.console.set_auto_trigger(id, body.enabled).await {
        Ok(connector) => Json(connector.summary()).into_response(),
        Err(e) => connector_error(e),
    }
}

// ── Backend ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct CredentialRequest {
    #[serde(default)]
    api_key: Option<String>,
}

async fn set_credential(State(state): State<AppState>, body: Bytes) -> Response {
    let request: CredentialRequest = match optional_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    state
        .console
        .set_credential(request.api_key.map(SecretString::from))
        .await;
    Json(serde_json::json!({ "mode": state.console.backend_mode().await })).into_response()
}

async fn backend(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "mode": state.console.backend_mode().await }))
}
