//! Frame ingest for out-of-process producers
//!
//! `POST /api/frame` takes one frame per request (body = encoded bytes,
//! optional `x-frame-timestamp` header in milliseconds since the epoch).
//! `GET /ws/ingest` takes one frame per binary message and only answers
//! when a submission fails.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::debug_throttled;
use crate::error::{AppError, Result};
use crate::manager::SubmitResult;
use crate::relay::{FrameIngest, FrameRelay};

/// Capture timestamp header, milliseconds since the Unix epoch
pub const TIMESTAMP_HEADER: &str = "x-frame-timestamp";

fn ingest_target(relay: &FrameRelay) -> Result<Arc<dyn FrameIngest>> {
    relay
        .ingest_target()
        .ok_or_else(|| AppError::ServiceUnavailable("Frame ingest is not available".to_string()))
}

/// Timestamp from the request header, or now
pub fn parse_timestamp(headers: &HeaderMap) -> Result<DateTime<Utc>> {
    let Some(value) = headers.get(TIMESTAMP_HEADER) else {
        return Ok(Utc::now());
    };
    let millis: i64 = value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| AppError::BadRequest(format!("Invalid {} header", TIMESTAMP_HEADER)))?;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| AppError::BadRequest(format!("{} out of range", TIMESTAMP_HEADER)))
}

/// `POST /api/frame`
pub async fn submit_frame(
    State(relay): State<Arc<FrameRelay>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SubmitResult>> {
    let target = ingest_target(&relay)?;
    let timestamp = parse_timestamp(&headers)?;
    Ok(Json(target.ingest(body, timestamp)))
}

/// `GET /ws/ingest`
pub async fn ingest_ws_handler(ws: WebSocketUpgrade, State(relay): State<Arc<FrameRelay>>) -> Response {
    if let Err(e) = ingest_target(&relay) {
        return e.into_response();
    }
    let max_message = relay.config().max_frame_bytes;
    ws.max_message_size(max_message)
        .on_upgrade(move |socket| handle_ingest(socket, relay))
}

async fn handle_ingest(mut socket: WebSocket, relay: Arc<FrameRelay>) {
    info!("Ingest producer connected");
    let mut submitted: u64 = 0;

    while let Some(msg) = socket.recv().await {
        let data = match msg {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Ingest receive error: {}", e);
                break;
            }
        };

        let result = match relay.ingest_target() {
            Some(target) => target.ingest(Bytes::from(data), Utc::now()),
            None => SubmitResult::failed("Frame ingest is not available"),
        };
        submitted += 1;

        if !result.success {
            debug_throttled!(
                relay.throttler(),
                "ingest_ws_failed",
                "Ingest submission failed: {:?}",
                result.error
            );
            let Ok(text) = serde_json::to_string(&result) else {
                continue;
            };
            if socket.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    }

    info!("Ingest producer disconnected after {} frames", submitted);
}
