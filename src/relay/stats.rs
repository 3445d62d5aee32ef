//! Relay statistics

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Aggregate relay statistics
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    pub viewer_count: usize,
    /// Broadcasts per second over the last completed window
    pub frames_per_second: f64,
    pub frames_broadcast: u64,
    /// Pending frames replaced before a viewer picked them up
    pub frames_dropped_for_viewers: u64,
}

/// Status query response
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub is_running: bool,
    pub port: Option<u16>,
    pub viewer_count: usize,
    pub fps: f64,
}

/// Per-viewer statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerStats {
    pub id: String,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub connected_secs: u64,
    /// Milliseconds since the last frame was written, if any was
    pub idle_ms: Option<u64>,
}

/// Counts events in a rolling window and reports the rate of the last
/// completed window
///
/// The counter resets every time a window completes, so the reported rate
/// reflects only recent activity.
#[derive(Debug)]
pub struct RateWindow {
    state: Mutex<WindowState>,
    window: Duration,
}

#[derive(Debug)]
struct WindowState {
    started: Instant,
    count: u64,
    rate: f64,
}

impl RateWindow {
    /// One-second window
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            state: Mutex::new(WindowState {
                started: Instant::now(),
                count: 0,
                rate: 0.0,
            }),
            window,
        }
    }

    pub fn record(&self) {
        self.record_at(Instant::now());
    }

    pub fn record_at(&self, now: Instant) {
        let mut state = self.state.lock();
        Self::roll(&mut state, now, self.window);
        state.count += 1;
    }

    /// Events per second
    pub fn rate(&self) -> f64 {
        self.rate_at(Instant::now())
    }

    pub fn rate_at(&self, now: Instant) -> f64 {
        let mut state = self.state.lock();
        Self::roll(&mut state, now, self.window);
        state.rate
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.started = Instant::now();
        state.count = 0;
        state.rate = 0.0;
    }

    fn roll(state: &mut WindowState, now: Instant, window: Duration) {
        let elapsed = now.saturating_duration_since(state.started);
        if elapsed >= window {
            state.rate = state.count as f64 / elapsed.as_secs_f64();
            state.count = 0;
            state.started = now;
        }
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new()
    }
}
