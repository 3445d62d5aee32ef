use axum::{
    extract::DefaultBodyLimit,
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::ingest::{ingest_ws_handler, submit_frame};
use super::page::viewer_page;
use super::ws::viewer_ws_handler;
use crate::relay::FrameRelay;

/// Create the relay router
pub fn create_router(relay: Arc<FrameRelay>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let max_frame_bytes = relay.config().max_frame_bytes;

    let viewer_routes = Router::new()
        .route("/", get(viewer_page))
        .route("/stream", get(viewer_page))
        .route("/ws", any(viewer_ws_handler));

    let api_routes = Router::new()
        .route("/status", get(handlers::relay_status))
        .route("/stats", get(handlers::relay_stats))
        .route("/sessions", get(handlers::list_sessions))
        .route("/frame", post(submit_frame))
        .layer(DefaultBodyLimit::max(max_frame_bytes));

    Router::new()
        .merge(viewer_routes)
        .route("/health", get(handlers::health_check))
        .route("/ws/ingest", any(ingest_ws_handler))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(relay)
}
