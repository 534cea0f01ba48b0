use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use constant_time_eq::constant_time_eq;
use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::{
    error::{AppError, AppResult},
    orchestrator::ScanOrchestrator,
    types::{ScanJob, ScanJobSummary, ScanRequest},
};

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone, Debug)]
pub struct AppState {
    orchestrator: ScanOrchestrator,
    api_key: Arc<str>,
}

impl AppState {
    pub fn new(orchestrator: ScanOrchestrator, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            orchestrator,
            api_key: api_key.into(),
        }
    }
}

/// `/health` is open; everything under `/scans` needs the shared secret.
pub fn router(state: AppState) -> Router {
    let scans = Router::new()
        .route("/scans", get(list_scans).post(create_scan))
        .route("/scans/{job_id}", get(get_scan))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .merge(scans)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    bind: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %listener.local_addr()?, "scan API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")?;
    Ok(())
}

// Missing and wrong keys both get 401.
async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Response {
    let verdict = req
        .headers()
        .get(API_KEY_HEADER)
        .map(|v| constant_time_eq(v.as_bytes(), app.api_key.as_bytes()));
    match verdict {
        Some(true) => next.run(req).await,
        Some(false) => {
            tracing::debug!(path = %req.uri().path(), "rejected request with wrong API key");
            AppError::unauthorized("Invalid API key").into_response()
        }
        None => {
            tracing::debug!(path = %req.uri().path(), "rejected request without API key");
            AppError::unauthorized("Not authenticated").into_response()
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_scan(
    State(app): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> AppResult<impl IntoResponse> {
    let created = app.orchestrator.create_scan(req)?;
    Ok((StatusCode::ACCEPTED, Json(created)))
}

async fn get_scan(
    State(app): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<ScanJob>> {
    Ok(Json(app.orchestrator.get_scan(&job_id)?))
}

async fn list_scans(State(app): State<AppState>) -> Json<Vec<ScanJobSummary>> {
    Json(app.orchestrator.list_scans())
}
