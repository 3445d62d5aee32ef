//! Viewer WebSocket transport
//!
//! Every binary message is one encoded frame with no header. A text message
//! `{"type":"stats","clients":N}` is sent every `stats_interval_ms`.
//!
//! Each connection runs one pump task that waits on the session's pending
//! frame slot. Writes are bounded by `send_timeout_ms`; a viewer that cannot
//! take a frame in time is dropped instead of holding anything up.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::relay::FrameRelay;
use crate::warn_throttled;

/// Side-channel stats message
#[derive(Debug, Serialize)]
struct StatsMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    clients: usize,
}

/// WebSocket upgrade handler for `/ws`
pub async fn viewer_ws_handler(ws: WebSocketUpgrade, State(relay): State<Arc<FrameRelay>>) -> Response {
    ws.on_upgrade(move |socket| handle_viewer(socket, relay))
}

/// Why a pump ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpExit {
    RelayClosed,
    ClientClosed,
    SendFailed,
    SendTimedOut,
}

async fn handle_viewer(socket: WebSocket, relay: Arc<FrameRelay>) {
    let mut handle = relay.on_connect();
    let id = handle.id().to_string();
    let (mut sender, mut receiver) = socket.split();

    let send_timeout = relay.config().send_timeout();
    let stats_every = relay.config().stats_interval();
    let mut stats_tick = interval_at(Instant::now() + stats_every, stats_every);
    stats_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let exit = loop {
        tokio::select! {
            frame = handle.next_frame() => {
                let Some(frame) = frame else {
                    break PumpExit::RelayClosed;
                };
                let message = Message::Binary(frame.data().to_vec());
                match send_bounded(&mut sender, message, send_timeout).await {
                    Ok(()) => handle.session().record_sent(),
                    Err(exit) => break exit,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break PumpExit::ClientClosed,
                    Some(Err(e)) => {
                        debug!("Viewer {} receive error: {}", id, e);
                        break PumpExit::ClientClosed;
                    }
                    // Viewers have nothing to say; pings are answered by axum
                    Some(Ok(_)) => {}
                }
            }

            _ = stats_tick.tick() => {
                let stats = StatsMessage {
                    kind: "stats",
                    clients: relay.viewer_count(),
                };
                let Ok(text) = serde_json::to_string(&stats) else {
                    continue;
                };
                if let Err(exit) = send_bounded(&mut sender, Message::Text(text), send_timeout).await {
                    break exit;
                }
            }
        }
    };

    match exit {
        PumpExit::SendTimedOut => {
            warn_throttled!(
                relay.throttler(),
                "viewer_send_timeout",
                "Viewer {} could not take a frame within {:?}, dropping it",
                id,
                send_timeout
            );
        }
        other => debug!("Viewer {} pump ended: {:?}", id, other),
    }

    handle.session().mark_dead();
    relay.disconnect(&id);

    if !matches!(exit, PumpExit::ClientClosed | PumpExit::SendFailed) {
        // Best effort close frame; the socket is dropped either way
        let _ = tokio::time::timeout(Duration::from_millis(200), sender.close()).await;
    }
}

async fn send_bounded<S>(sender: &mut S, message: Message, limit: Duration) -> Result<(), PumpExit>
where
    S: futures::Sink<Message> + Unpin,
{
    match tokio::time::timeout(limit, sender.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(PumpExit::SendFailed),
        Err(_) => Err(PumpExit::SendTimedOut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_message_shape() {
        let msg = StatsMessage {
            kind: "stats",
            clients: 3,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({"type": "stats", "clients": 3})
        );
    }

    #[tokio::test]
    async fn test_send_bounded_times_out() {
        // A sink that never becomes ready
        struct Stuck;
        impl futures::Sink<Message> for Stuck {
            type Error = ();
            fn poll_ready(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<Result<(), ()>> {
                std::task::Poll::Pending
            }
            fn start_send(self: std::pin::Pin<&mut Self>, _item: Message) -> Result<(), ()> {
                Ok(())
            }
            fn poll_flush(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<Result<(), ()>> {
                std::task::Poll::Pending
            }
            fn poll_close(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<Result<(), ()>> {
                std::task::Poll::Pending
            }
        }

        let mut sink = Stuck;
        let result = send_bounded(&mut sink, Message::Binary(vec![1]), Duration::from_millis(20)).await;
        assert_eq!(result, Err(PumpExit::SendTimedOut));
    }
}
