use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::relay::{FrameRelay, RelayStats, RelayStatus, ViewerStats};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `{isRunning, port, viewerCount, fps}`
pub async fn relay_status(State(relay): State<Arc<FrameRelay>>) -> Json<RelayStatus> {
    Json(relay.status())
}

pub async fn relay_stats(State(relay): State<Arc<FrameRelay>>) -> Json<RelayStats> {
    Json(relay.stats())
}

/// Per-viewer statistics
pub async fn list_sessions(State(relay): State<Arc<FrameRelay>>) -> Json<Vec<ViewerStats>> {
    Json(relay.sessions())
}
