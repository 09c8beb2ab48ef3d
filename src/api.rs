use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::trading_core::StatusSnapshot;
use crate::types::AppState;

/// Response for the status endpoint
#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: StatusSnapshot,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
}

/// GET /api/status - Current session snapshot
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.status.read().await.clone();
    let uptime_secs = (Utc::now() - state.started_at).num_seconds();

    (
        StatusCode::OK,
        Json(StatusResponse {
            status,
            started_at: state.started_at,
            uptime_secs,
        }),
    )
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

/// Serve the status API until the task is dropped
pub async fn serve(port: u16, state: Arc<AppState>) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status server on {}", addr))?;

    info!("Status server running at http://{}/api/status", addr);
    axum::serve(listener, router(state))
        .await
        .context("Status server failed")?;
    Ok(())
}
