//! System endpoints: health check and sync status.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::app_state::AppState;
use crate::error::IndexerError;
use crate::realtime::ConnectionState;

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
}

/// `GET /health`: service health status.
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Sync progress.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusResponse {
    /// Known pairs.
    pub pairs: u64,
    /// Pairs whose snapshot is current.
    pub synchronized: u64,
    /// An import or validation is running.
    pub scheduler_busy: bool,
    /// Realtime connection state.
    pub realtime: ConnectionState,
}

/// `GET /status`: pair counters, scheduler and realtime state.
///
/// # Errors
///
/// Returns [`IndexerError::Persistence`] if the counters cannot be read.
pub async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, IndexerError> {
    let status = state.gateway.sync_status().await?;
    Ok(Json(StatusResponse {
        pairs: status.pairs,
        synchronized: status.synchronized,
        scheduler_busy: state.run_guard.is_busy(),
        realtime: *state.realtime.borrow(),
    }))
}

/// System routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
}
