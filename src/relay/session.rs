//! Viewer sessions
//!
//! A session is split in two halves: the registry keeps a [`SessionEntry`]
//! (the write side of the session's frame slot) and the transport task keeps
//! the [`ViewerHandle`] (the read side). Dropping the entry ends the
//! transport; dropping the handle makes the next broadcast see the session
//! as dead.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use super::frame::Frame;
use super::stats::ViewerStats;

/// Session ID type (UUID string)
pub type SessionId = String;

/// Sentinel for "never sent"
const NEVER: u64 = u64::MAX;

/// Shared per-viewer state
#[derive(Debug)]
pub struct ViewerSession {
    id: SessionId,
    connected_at: Instant,
    alive: AtomicBool,
    /// Milliseconds after `connected_at` of the last write
    last_send_ms: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    /// Highest sequence handed to the transport (0 = none)
    last_taken: AtomicU64,
}

impl ViewerSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            connected_at: Instant::now(),
            alive: AtomicBool::new(true),
            last_send_ms: AtomicU64::new(NEVER),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            last_taken: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Record a frame written to the transport
    pub fn record_sent(&self) {
        let ms = self.connected_at.elapsed().as_millis() as u64;
        self.last_send_ms.store(ms, Ordering::Relaxed);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// When the last frame was written, if any was
    pub fn last_send(&self) -> Option<Instant> {
        match self.last_send_ms.load(Ordering::Relaxed) {
            NEVER => None,
            ms => Some(self.connected_at + std::time::Duration::from_millis(ms)),
        }
    }

    fn last_taken(&self) -> u64 {
        self.last_taken.load(Ordering::Acquire)
    }

    fn mark_taken(&self, sequence: u64) {
        self.last_taken.fetch_max(sequence, Ordering::AcqRel);
    }

    pub fn stats(&self) -> ViewerStats {
        ViewerStats {
            id: self.id.clone(),
            frames_sent: self.frames_sent(),
            frames_dropped: self.frames_dropped(),
            connected_secs: self.connected_at.elapsed().as_secs(),
            idle_ms: self.last_send().map(|t| t.elapsed().as_millis() as u64),
        }
    }
}

/// Outcome of offering a frame to one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Slot was empty or already consumed
    Queued,
    /// An unsent frame was replaced
    Replaced,
    /// Transport is gone
    Dead,
}

/// Registry-side half of a session
pub(crate) struct SessionEntry {
    pub(crate) session: Arc<ViewerSession>,
    slot: watch::Sender<Option<Arc<Frame>>>,
}

impl SessionEntry {
    /// Create a session, seeding its slot with `latest` so the viewer
    /// starts from the current picture.
    pub(crate) fn new(id: SessionId, latest: Option<Arc<Frame>>) -> (Self, ViewerHandle) {
        let session = Arc::new(ViewerSession::new(id));
        let (slot, frames) = watch::channel(None);
        if latest.is_some() {
            // send_replace marks the value as unseen for the receiver
            slot.send_replace(latest);
        }
        (
            Self {
                session: session.clone(),
                slot,
            },
            ViewerHandle { session, frames },
        )
    }

    /// Replace the pending frame without waiting on the transport
    pub(crate) fn offer(&self, frame: &Arc<Frame>) -> Delivery {
        if !self.session.is_alive() || self.slot.is_closed() {
            return Delivery::Dead;
        }

        let previous = self.slot.send_replace(Some(frame.clone()));
        match previous {
            Some(prev) if prev.sequence > self.session.last_taken() => {
                self.session.record_dropped();
                Delivery::Replaced
            }
            _ => Delivery::Queued,
        }
    }
}

/// Transport-side half of a session
pub struct ViewerHandle {
    session: Arc<ViewerSession>,
    frames: watch::Receiver<Option<Arc<Frame>>>,
}

impl ViewerHandle {
    pub fn id(&self) -> &str {
        self.session.id()
    }

    pub fn session(&self) -> &Arc<ViewerSession> {
        &self.session
    }

    /// Wait for the next frame newer than anything taken before.
    ///
    /// Returns `None` once the relay dropped the session.
    pub async fn next_frame(&mut self) -> Option<Arc<Frame>> {
        loop {
            self.frames.changed().await.ok()?;
            if let Some(frame) = self.take_pending() {
                return Some(frame);
            }
        }
    }

    /// Take the pending frame, if a newer one is waiting
    pub fn try_next_frame(&mut self) -> Option<Arc<Frame>> {
        match self.frames.has_changed() {
            Ok(true) => self.take_pending(),
            _ => None,
        }
    }

    fn take_pending(&mut self) -> Option<Arc<Frame>> {
        let frame = self.frames.borrow_and_update().clone()?;
        if frame.sequence <= self.session.last_taken() {
            return None;
        }
        self.session.mark_taken(frame.sequence);
        Some(frame)
    }
}
