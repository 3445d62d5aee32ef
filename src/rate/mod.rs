//! Frame rate controller
//!
//! Decides per submission whether a frame is forwarded to the outputs or
//! skipped, so a producer running faster than the target cadence does not
//! saturate viewers, and a slow producer lowers the target instead of
//! building a backlog.
//!
//! The controller tracks an exponentially weighted moving average of the
//! interval between frame arrivals. On every submission the target rate
//! moves a fraction of the way toward the producer's rate, clamped to
//! `[min_fps, max_fps]`. A frame is forwarded when the time since the last
//! forwarded frame reaches `drop_threshold` of the target interval.

use std::time::{Duration, Instant};
use tracing::trace;

use crate::config::RateConfig;

/// Forward or skip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Forward,
    Skip,
}

/// Adaptive frame rate controller
#[derive(Debug, Clone)]
pub struct RateController {
    min_fps: f64,
    max_fps: f64,
    drop_threshold: f64,
    smoothing: f64,
    adapt: f64,
    target_fps: f64,
    /// Smoothed arrival interval in seconds
    ewma_interval: Option<f64>,
    last_arrival: Option<Instant>,
    last_forwarded_at: Option<Instant>,
}

impl RateController {
    /// Create a controller targeting `max_fps`
    pub fn new(max_fps: u32, config: &RateConfig) -> Self {
        let max_fps = f64::from(max_fps.max(1));
        let min_fps = f64::from(config.min_fps.max(1)).min(max_fps);
        Self {
            min_fps,
            max_fps,
            drop_threshold: config.drop_threshold,
            smoothing: config.smoothing,
            adapt: config.adapt,
            target_fps: max_fps,
            ewma_interval: None,
            last_arrival: None,
            last_forwarded_at: None,
        }
    }

    /// Decide for a frame arriving now
    pub fn decide(&mut self) -> RateDecision {
        self.decide_at(Instant::now())
    }

    /// Decide for a frame arriving at `now`
    pub fn decide_at(&mut self, now: Instant) -> RateDecision {
        if let Some(last) = self.last_arrival {
            self.observe(now.saturating_duration_since(last));
        }
        self.last_arrival = Some(now);

        let Some(last_forwarded) = self.last_forwarded_at else {
            self.last_forwarded_at = Some(now);
            return RateDecision::Forward;
        };

        let elapsed = now.saturating_duration_since(last_forwarded).as_secs_f64();
        if elapsed < self.target_interval().as_secs_f64() * self.drop_threshold {
            trace!(elapsed, target_fps = self.target_fps, "Skipping frame");
            return RateDecision::Skip;
        }

        self.last_forwarded_at = Some(now);
        RateDecision::Forward
    }

    /// Fold one arrival interval into the average and move the target
    fn observe(&mut self, interval: Duration) {
        // Gaps longer than the floor interval all mean "slower than the
        // floor"; capping them keeps a pause from dominating the average.
        let observed = interval.as_secs_f64().min(1.0 / self.min_fps);

        let ewma = match self.ewma_interval {
            Some(prev) => (1.0 - self.smoothing) * prev + self.smoothing * observed,
            None => observed,
        };
        self.ewma_interval = Some(ewma);

        let producer_fps = if ewma > 0.0 { 1.0 / ewma } else { self.max_fps };
        let desired = producer_fps.clamp(self.min_fps, self.max_fps);
        self.target_fps =
            (self.target_fps + (desired - self.target_fps) * self.adapt).clamp(self.min_fps, self.max_fps);
    }

    /// Current target rate
    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    /// Interval between forwarded frames at the target rate
    pub fn target_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps)
    }

    /// Smoothed producer rate, once two frames arrived
    pub fn measured_fps(&self) -> Option<f64> {
        self.ewma_interval
            .filter(|ewma| *ewma > 0.0)
            .map(|ewma| 1.0 / ewma)
    }

    /// Forget history and return to the ceiling
    pub fn reset(&mut self) {
        self.target_fps = self.max_fps;
        self.ewma_interval = None;
        self.last_arrival = None;
        self.last_forwarded_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(max_fps: u32) -> RateController {
        RateController::new(max_fps, &RateConfig::default())
    }

    /// Feed `count` arrivals spaced by `interval` starting at `start`,
    /// returning the decisions and the time after the last arrival.
    fn feed(
        rate: &mut RateController,
        start: Instant,
        interval: Duration,
        count: u32,
    ) -> (Vec<RateDecision>, Instant) {
        let mut decisions = Vec::new();
        let mut now = start;
        for _ in 0..count {
            decisions.push(rate.decide_at(now));
            now += interval;
        }
        (decisions, now - interval)
    }

    fn forwarded(decisions: &[RateDecision]) -> usize {
        decisions.iter().filter(|d| **d == RateDecision::Forward).count()
    }

    #[test]
    fn test_first_frame_forwarded() {
        let mut rate = controller(30);
        assert_eq!(rate.decide_at(Instant::now()), RateDecision::Forward);
    }

    #[test]
    fn test_steady_producer_at_target_forwards_everything() {
        let mut rate = controller(30);
        let (decisions, _) = feed(&mut rate, Instant::now(), Duration::from_millis(33), 5);
        assert_eq!(forwarded(&decisions), 5);
    }

    #[test]
    fn test_burst_after_steady_stream() {
        let mut rate = controller(30);
        let (_, last) = feed(&mut rate, Instant::now(), Duration::from_millis(33), 5);

        // F1..F5 again at 5ms spacing, the first one on the usual cadence
        let (decisions, _) = feed(
            &mut rate,
            last + Duration::from_millis(33),
            Duration::from_millis(5),
            5,
        );
        assert_eq!(
            decisions,
            vec![
                RateDecision::Forward,
                RateDecision::Skip,
                RateDecision::Skip,
                RateDecision::Skip,
                RateDecision::Skip,
            ]
        );
    }

    #[test]
    fn test_forward_iff_elapsed_reaches_threshold() {
        let mut rate = controller(30);
        let start = Instant::now();
        let threshold = rate.target_interval().mul_f64(0.8);
        let step = Duration::from_millis(2);

        let mut last_forward = start;
        assert_eq!(rate.decide_at(start), RateDecision::Forward);
        for i in 1..200u32 {
            let now = start + step * i;
            let decision = rate.decide_at(now);
            let expected = if now - last_forward >= threshold {
                RateDecision::Forward
            } else {
                RateDecision::Skip
            };
            assert_eq!(decision, expected, "submission {}", i);
            if decision == RateDecision::Forward {
                last_forward = now;
            }
        }
    }

    #[test]
    fn test_fast_producer_forwarded_fraction() {
        let mut rate = controller(30);
        let target = rate.target_interval();
        let interval = target / 4;

        let (decisions, _) = feed(&mut rate, Instant::now(), interval, 1000);
        let fraction = forwarded(&decisions) as f64 / 1000.0;
        let expected = interval.as_secs_f64() / target.as_secs_f64();
        assert!(
            (fraction - expected).abs() <= expected * 0.1,
            "forwarded fraction {} vs expected {}",
            fraction,
            expected
        );
        assert!((rate.target_fps() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_slow_producer_decays_to_floor() {
        let mut rate = controller(30);
        let (decisions, _) = feed(&mut rate, Instant::now(), Duration::from_millis(100), 200);

        // Never stalls: every frame of a slow producer is forwarded
        assert_eq!(forwarded(&decisions), 200);
        assert!((rate.target_fps() - 15.0).abs() < 0.5, "target {}", rate.target_fps());
        let measured = rate.measured_fps().unwrap();
        assert!(measured >= 14.0 && measured <= 16.0, "measured {}", measured);
    }

    #[test]
    fn test_recovers_when_producer_speeds_up() {
        let mut rate = controller(30);
        let (_, last) = feed(&mut rate, Instant::now(), Duration::from_millis(100), 100);
        assert!(rate.target_fps() < 16.0);

        let (_, _) = feed(&mut rate, last + Duration::from_millis(33), Duration::from_millis(33), 200);
        assert!(rate.target_fps() > 28.0, "target {}", rate.target_fps());

        let (decisions, _) = feed(&mut rate, Instant::now() + Duration::from_secs(60), Duration::from_millis(33), 30);
        assert!(forwarded(&decisions) >= 29);
    }

    #[test]
    fn test_producer_below_ceiling_tracks_its_rate() {
        // 25 fps producer under a 30 fps ceiling
        let mut rate = controller(30);
        let (decisions, last) = feed(&mut rate, Instant::now(), Duration::from_millis(40), 300);

        assert_eq!(forwarded(&decisions), 300);
        assert!((rate.target_fps() - 25.0).abs() < 0.5, "target {}", rate.target_fps());
        let measured = rate.measured_fps().unwrap();
        assert!((measured - 25.0).abs() < 0.5, "measured {}", measured);

        // The target is not pinned to the forwarded cadence: back at the
        // ceiling rate it climbs again and nothing is skipped on the way
        let (decisions, _) = feed(&mut rate, last + Duration::from_millis(33), Duration::from_millis(33), 300);
        assert_eq!(forwarded(&decisions), 300);
        assert!(rate.target_fps() > 29.0, "target {}", rate.target_fps());
    }

    #[test]
    fn test_target_always_clamped() {
        let config = RateConfig {
            min_fps: 10,
            ..RateConfig::default()
        };
        let mut rate = RateController::new(60, &config);
        let start = Instant::now();

        for i in 0..500u32 {
            // Alternate bursts and pauses
            let offset = if i % 50 < 25 { i } else { i * 40 };
            rate.decide_at(start + Duration::from_millis(u64::from(offset)));
            assert!(rate.target_fps() >= 10.0 && rate.target_fps() <= 60.0);
        }
    }

    #[test]
    fn test_reset() {
        let mut rate = controller(30);
        feed(&mut rate, Instant::now(), Duration::from_millis(100), 50);
        rate.reset();
        assert_eq!(rate.target_fps(), 30.0);
        assert!(rate.measured_fps().is_none());
        assert_eq!(rate.decide_at(Instant::now()), RateDecision::Forward);
    }
}
