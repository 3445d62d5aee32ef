//! Frame relay server
//!
//! Owns the viewer registry and the latest-frame slot, and fans frames out
//! to every connected viewer without ever waiting on one.

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::frame::Frame;
use super::session::{Delivery, SessionEntry, SessionId, ViewerHandle};
use super::stats::{RateWindow, RelayStats, RelayStatus, ViewerStats};
use crate::config::RelayConfig;
use crate::error::{AppError, Result};
use crate::manager::SubmitResult;
use crate::utils::{bind_with_fallback, LogThrottler};

/// Receives frames pushed through the relay's ingest endpoints
pub trait FrameIngest: Send + Sync {
    fn ingest(&self, data: Bytes, timestamp: DateTime<Utc>) -> SubmitResult;
}

/// Externally reachable URLs of a listening relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEndpoints {
    pub host: String,
    pub port: u16,
    /// Embeddable viewer page
    pub endpoint_url: String,
    /// Binary frame transport
    pub ws_url: String,
}

impl RelayEndpoints {
    pub fn new(host: &str, port: u16) -> Self {
        // Bracket IPv6 literals in URLs
        let authority = if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        Self {
            host: host.to_string(),
            port,
            endpoint_url: format!("http://{}/stream", authority),
            ws_url: format!("ws://{}/ws", authority),
        }
    }
}

/// Running HTTP server
struct ServerHandle {
    endpoints: RelayEndpoints,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Frame relay server
pub struct FrameRelay {
    config: RelayConfig,
    /// Connected viewers; iterated under the read lock, mutated under the
    /// write lock, never both at once
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    /// Set by `stop` under the registry write lock; cleared by `listen`
    stopped: AtomicBool,
    /// Latest frame, swapped atomically
    latest: ArcSwapOption<Frame>,
    server: tokio::sync::Mutex<Option<ServerHandle>>,
    /// Bound port (0 = not listening), readable without the server lock
    port: AtomicU16,
    ingest: Option<Weak<dyn FrameIngest>>,
    frames_broadcast: AtomicU64,
    frames_dropped: AtomicU64,
    broadcast_rate: RateWindow,
    throttler: LogThrottler,
}

impl FrameRelay {
    /// Create a relay; nothing is bound until [`FrameRelay::listen`]
    pub fn new(config: RelayConfig) -> Arc<Self> {
        Self::with_ingest(config, None)
    }

    /// Create a relay that forwards ingest requests to `ingest`
    pub fn with_ingest(config: RelayConfig, ingest: Option<Weak<dyn FrameIngest>>) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            stopped: AtomicBool::new(false),
            latest: ArcSwapOption::empty(),
            server: tokio::sync::Mutex::new(None),
            port: AtomicU16::new(0),
            ingest,
            frames_broadcast: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            broadcast_rate: RateWindow::new(),
            throttler: LogThrottler::default(),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub(crate) fn throttler(&self) -> &LogThrottler {
        &self.throttler
    }

    /// Ingest target, if ingest is enabled and the target is still alive
    pub fn ingest_target(&self) -> Option<Arc<dyn FrameIngest>> {
        if !self.config.ingest_enabled {
            return None;
        }
        self.ingest.as_ref().and_then(Weak::upgrade)
    }

    // ========================================================================
    // Listening
    // ========================================================================

    /// Bind the listening socket and start serving.
    ///
    /// Tries `preferred_port`, then the configured fallbacks, then an
    /// ephemeral port. Calling this while already listening returns the
    /// current endpoints.
    pub async fn listen(self: &Arc<Self>, preferred_port: u16) -> Result<RelayEndpoints> {
        let mut server = self.server.lock().await;
        if let Some(ref running) = *server {
            return Ok(running.endpoints.clone());
        }

        let ip = self.config.bind_ip()?;
        let listener = bind_with_fallback(ip, preferred_port, &self.config.fallback_ports)
            .map_err(|e| AppError::Initialization(format!("No port could be bound on {}: {}", ip, e)))?;
        let local_addr = listener.local_addr()?;
        let listener = tokio::net::TcpListener::from_std(listener)?;

        let host = self.advertised_host(ip);
        let endpoints = RelayEndpoints::new(&host, local_addr.port());

        let app = crate::web::create_router(self.clone());
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(e) = result {
                error!("Relay server error: {}", e);
            }
        });

        info!(
            port = local_addr.port(),
            "Relay listening on {} (viewer: {}, transport: {})",
            local_addr,
            endpoints.endpoint_url,
            endpoints.ws_url
        );

        self.port.store(local_addr.port(), Ordering::Release);
        self.stopped.store(false, Ordering::Release);
        *server = Some(ServerHandle {
            endpoints: endpoints.clone(),
            shutdown,
            task,
        });
        Ok(endpoints)
    }

    fn advertised_host(&self, ip: std::net::IpAddr) -> String {
        if let Some(ref host) = self.config.advertise_host {
            return host.clone();
        }
        if ip.is_unspecified() {
            return "localhost".to_string();
        }
        ip.to_string()
    }

    /// Endpoints of the running server, if any
    pub async fn endpoints(&self) -> Option<RelayEndpoints> {
        self.server.lock().await.as_ref().map(|s| s.endpoints.clone())
    }

    /// Actually bound port, if listening
    pub fn port(&self) -> Option<u16> {
        match self.port.load(Ordering::Acquire) {
            0 => None,
            port => Some(port),
        }
    }

    pub fn is_running(&self) -> bool {
        self.port().is_some()
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Register a viewer.
    ///
    /// The session starts with the latest frame pending, so a late joiner
    /// shows the current picture instead of waiting for the next push.
    /// After [`FrameRelay::stop`] the returned handle is already closed.
    pub fn on_connect(&self) -> ViewerHandle {
        let id = uuid::Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write();
        if self.stopped.load(Ordering::Acquire) {
            let (entry, handle) = SessionEntry::new(id.clone(), None);
            entry.session.mark_dead();
            debug!("Viewer {} rejected, relay stopped", id);
            return handle;
        }
        // Read the slot under the write lock: a concurrent broadcast either
        // stored its frame before this read or offers it to the new entry.
        let (entry, handle) = SessionEntry::new(id.clone(), self.latest.load_full());
        sessions.insert(id.clone(), entry);
        info!("Viewer {} connected (total: {})", id, sessions.len());
        handle
    }

    /// Remove a viewer; unknown ids are ignored
    pub fn disconnect(&self, id: &str) {
        let removed = self.sessions.write().remove(id);
        if let Some(entry) = removed {
            entry.session.mark_dead();
            let stats = entry.session.stats();
            info!(
                "Viewer {} disconnected after {}s ({} frames sent, {} dropped)",
                id, stats.connected_secs, stats.frames_sent, stats.frames_dropped
            );
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Per-viewer statistics
    pub fn sessions(&self) -> Vec<ViewerStats> {
        self.sessions
            .read()
            .values()
            .map(|entry| entry.session.stats())
            .collect()
    }

    // ========================================================================
    // Broadcast
    // ========================================================================

    /// Publish `frame` as the latest frame and offer it to every viewer.
    ///
    /// Never blocks and never fails: sessions whose transport is gone are
    /// removed once the iteration is over.
    pub fn broadcast(&self, frame: Arc<Frame>) {
        self.latest.store(Some(frame.clone()));
        self.frames_broadcast.fetch_add(1, Ordering::Relaxed);
        self.broadcast_rate.record();

        let mut dead = Vec::new();
        {
            let sessions = self.sessions.read();
            for (id, entry) in sessions.iter() {
                match entry.offer(&frame) {
                    Delivery::Queued => {}
                    Delivery::Replaced => {
                        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Delivery::Dead => dead.push(id.clone()),
                }
            }
        }

        if !dead.is_empty() {
            let mut sessions = self.sessions.write();
            for id in dead {
                if sessions.remove(&id).is_some() {
                    debug!("Removed dead viewer {}", id);
                }
            }
        }
    }

    /// Latest broadcast frame
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.latest.load_full()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            viewer_count: self.viewer_count(),
            frames_per_second: self.broadcast_rate.rate(),
            frames_broadcast: self.frames_broadcast.load(Ordering::Relaxed),
            frames_dropped_for_viewers: self.frames_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            is_running: self.is_running(),
            port: self.port(),
            viewer_count: self.viewer_count(),
            fps: self.broadcast_rate.rate(),
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Close every viewer, clear the registry and release the socket.
    ///
    /// Safe to call when never started and idempotent.
    pub async fn stop(&self) -> Result<()> {
        let server = self.server.lock().await.take();

        let closed: Vec<SessionEntry> = {
            let mut sessions = self.sessions.write();
            self.stopped.store(true, Ordering::Release);
            sessions.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &closed {
            entry.session.mark_dead();
        }
        if !closed.is_empty() {
            info!("Closing {} viewer(s)", closed.len());
        }
        // Dropping the entries ends every transport task
        drop(closed);

        self.latest.store(None);
        self.port.store(0, Ordering::Release);
        self.frames_broadcast.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.broadcast_rate.reset();

        if let Some(server) = server {
            server.shutdown.cancel();
            let mut task = server.task;
            match tokio::time::timeout(self.config.shutdown_timeout(), &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Relay server task failed: {}", e),
                Err(_) => {
                    warn!("Relay server did not shut down in time, aborting");
                    task.abort();
                }
            }
            info!("Relay on port {} stopped", server.endpoints.port);
        }

        Ok(())
    }
}
