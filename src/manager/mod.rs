//! Output manager
//!
//! Composition root of the output side: picks a backend through the probe,
//! owns the native driver binding and the frame relay, runs every submitted
//! frame through the rate controller and exposes the start/stop lifecycle.
//!
//! ```text
//! Idle -> Starting -> Active -> Stopping -> Idle
//!           |
//!           +-> Idle (initialization failed, everything released)
//! ```

mod types;

pub use types::{ManagerState, ManagerStatus, SubmitOutcome, SubmitResult};

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::output::VirtualCamera;
use crate::probe::{Backend, BackendKind, BackendProbe, SystemProbe};
use crate::rate::{RateController, RateDecision};
use crate::relay::{Frame, FrameIngest, FrameRelay, RelayEndpoints};
use crate::utils::LogThrottler;
use crate::{debug_throttled, warn_throttled};

/// Per-frame path, serialized so sequence numbers reach every output in
/// order
struct Pipeline {
    rate: RateController,
    driver: Option<Box<dyn VirtualCamera>>,
    next_sequence: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    forwarded: AtomicU64,
    skipped: AtomicU64,
    driver_errors: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.forwarded.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.driver_errors.store(0, Ordering::Relaxed);
    }
}

/// Output manager
pub struct OutputManager {
    config: RwLock<AppConfig>,
    probe: Arc<dyn BackendProbe>,
    /// Serializes start and stop
    lifecycle: tokio::sync::Mutex<()>,
    state: RwLock<ManagerState>,
    backend: RwLock<Option<BackendKind>>,
    relay: ArcSwapOption<FrameRelay>,
    endpoints: RwLock<Option<RelayEndpoints>>,
    pipeline: Mutex<Pipeline>,
    counters: Counters,
    throttler: LogThrottler,
}

impl OutputManager {
    /// Create a manager probing the real host
    pub fn new(config: AppConfig) -> Arc<Self> {
        let probe = Arc::new(SystemProbe::new(config.probe.clone()));
        Self::with_probe(config, probe)
    }

    /// Create a manager with a custom backend probe
    pub fn with_probe(config: AppConfig, probe: Arc<dyn BackendProbe>) -> Arc<Self> {
        let rate = RateController::new(config.output.fps, &config.rate);
        Arc::new(Self {
            config: RwLock::new(config),
            probe,
            lifecycle: tokio::sync::Mutex::new(()),
            state: RwLock::new(ManagerState::Idle),
            backend: RwLock::new(None),
            relay: ArcSwapOption::empty(),
            endpoints: RwLock::new(None),
            pipeline: Mutex::new(Pipeline {
                rate,
                driver: None,
                next_sequence: 1,
            }),
            counters: Counters::default(),
            throttler: LogThrottler::default(),
        })
    }

    pub fn state(&self) -> ManagerState {
        *self.state.read()
    }

    /// Configuration the next start uses
    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Running relay, if any
    pub fn relay(&self) -> Option<Arc<FrameRelay>> {
        self.relay.load_full()
    }

    /// Relay endpoints, once listening
    pub fn endpoints(&self) -> Option<RelayEndpoints> {
        self.endpoints.read().clone()
    }

    fn set_state(&self, state: ManagerState) {
        *self.state.write() = state;
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the outputs.
    ///
    /// Succeeds without side effects when already active. On failure every
    /// partially acquired resource is released and the manager is idle.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let config = {
            let mut state = self.state.write();
            match *state {
                ManagerState::Active => {
                    debug!("Output manager already active");
                    return Ok(());
                }
                ManagerState::Idle => {}
                other => {
                    return Err(AppError::InvalidState(format!("Cannot start while {}", other)));
                }
            }
            *state = ManagerState::Starting;
            self.config.read().clone()
        };

        match self.start_outputs(&config).await {
            Ok(()) => {
                self.set_state(ManagerState::Active);
                Ok(())
            }
            Err(e) => {
                warn!("Output manager failed to start: {}", e);
                self.set_state(ManagerState::Idle);
                Err(e)
            }
        }
    }

    async fn start_outputs(self: &Arc<Self>, config: &AppConfig) -> Result<()> {
        let probe = self.probe.clone();
        let output = config.output.clone();
        let backend = tokio::task::spawn_blocking(move || probe.detect(&output))
            .await
            .map_err(|e| AppError::Initialization(format!("Backend probe failed: {}", e)))?;
        let kind = backend.kind();

        let ingest: Weak<dyn FrameIngest> = Arc::downgrade(self) as Weak<dyn FrameIngest>;
        let relay = FrameRelay::with_ingest(config.relay.clone(), Some(ingest));
        let preferred_port = config.relay.preferred_port;

        let (driver, relay) = match backend {
            Backend::NativeDriver(camera) => {
                // Driver setup and relay bind run side by side; the relay is
                // only for diagnostics in this mode
                let output = config.output.clone();
                let configure = tokio::task::spawn_blocking(move || {
                    let mut camera = camera;
                    let result = camera.configure(&output);
                    (camera, result)
                });
                let (configured, listened) = tokio::join!(configure, relay.listen(preferred_port));

                let camera = match configured {
                    Ok((camera, Ok(()))) => camera,
                    Ok((mut camera, Err(e))) => {
                        if let Err(close_err) = camera.close() {
                            warn!("Failed to release driver after setup error: {}", close_err);
                        }
                        Self::release_relay(&relay).await;
                        return Err(AppError::Initialization(format!(
                            "Native driver setup failed: {}",
                            e
                        )));
                    }
                    Err(e) => {
                        Self::release_relay(&relay).await;
                        return Err(AppError::Initialization(format!(
                            "Native driver setup panicked: {}",
                            e
                        )));
                    }
                };

                match listened {
                    Ok(endpoints) => {
                        *self.endpoints.write() = Some(endpoints);
                        (Some(camera), Some(relay))
                    }
                    Err(e) => {
                        warn!("Diagnostic relay unavailable, running driver only: {}", e);
                        (Some(camera), None)
                    }
                }
            }
            Backend::RelayOnly | Backend::Diagnostic => {
                let endpoints = relay.listen(preferred_port).await.map_err(|e| match e {
                    AppError::Initialization(_) => e,
                    other => AppError::Initialization(other.to_string()),
                })?;
                *self.endpoints.write() = Some(endpoints);
                (None, Some(relay))
            }
        };

        {
            let mut pipeline = self.pipeline.lock();
            pipeline.rate = RateController::new(config.output.fps, &config.rate);
            pipeline.driver = driver;
            pipeline.next_sequence = 1;
        }
        self.relay.store(relay);
        *self.backend.write() = Some(kind);

        match self.endpoints() {
            Some(endpoints) => info!(
                backend = %kind,
                port = endpoints.port,
                "Output active: viewer {} transport {}",
                endpoints.endpoint_url,
                endpoints.ws_url
            ),
            None => info!(backend = %kind, "Output active without relay"),
        }
        Ok(())
    }

    async fn release_relay(relay: &FrameRelay) {
        if let Err(e) = relay.stop().await {
            warn!("Failed to release relay: {}", e);
        }
    }

    /// Stop the outputs.
    ///
    /// Always ends idle; failures releasing a resource are logged and the
    /// rest of the teardown continues. A no-op when never started.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut state = self.state.write();
            if *state == ManagerState::Idle {
                debug!("Output manager not active, nothing to stop");
                return Ok(());
            }
            *state = ManagerState::Stopping;
        }
        info!("Stopping output manager");

        let driver = {
            let mut pipeline = self.pipeline.lock();
            pipeline.rate.reset();
            pipeline.driver.take()
        };
        if let Some(mut driver) = driver {
            let device = driver.device().display().to_string();
            match driver.close() {
                Ok(()) => debug!("Released driver {}", device),
                Err(e) => warn!("Failed to release driver {}: {}", device, e),
            }
        }

        if let Some(relay) = self.relay.swap(None) {
            Self::release_relay(&relay).await;
        }

        *self.endpoints.write() = None;
        *self.backend.write() = None;
        self.counters.reset();
        self.throttler.clear_all();
        self.set_state(ManagerState::Idle);
        info!("Output manager stopped");
        Ok(())
    }

    /// Change the output size used by the next start
    pub fn set_resolution(&self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(AppError::BadRequest(format!(
                "Invalid resolution {}x{}",
                width, height
            )));
        }

        // Hold the state lock so a concurrent start cannot snapshot the
        // config halfway through
        let state = self.state.read();
        if *state != ManagerState::Idle {
            return Err(AppError::InvalidState(format!(
                "Resolution can only change while idle (currently {})",
                *state
            )));
        }
        let mut config = self.config.write();
        config.output.width = width;
        config.output.height = height;
        info!("Output resolution set to {}x{}", width, height);
        Ok(())
    }

    // ========================================================================
    // Frames
    // ========================================================================

    /// Submit one encoded frame.
    ///
    /// Only valid while active. A skipped frame is a success; driver write
    /// failures are counted and logged but never fail the submission.
    pub fn submit(&self, data: Bytes, timestamp: DateTime<Utc>) -> Result<SubmitOutcome> {
        let mut pipeline = self.pipeline.lock();
        if *self.state.read() != ManagerState::Active {
            return Err(AppError::NotActive);
        }
        if data.is_empty() {
            return Err(AppError::BadRequest("Empty frame".to_string()));
        }

        self.counters.received.fetch_add(1, Ordering::Relaxed);
        if pipeline.rate.decide() == RateDecision::Skip {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(SubmitOutcome::Skipped);
        }

        let sequence = pipeline.next_sequence;
        pipeline.next_sequence += 1;
        let frame = Arc::new(Frame::new(data, sequence, timestamp));

        if let Some(driver) = pipeline.driver.as_mut() {
            if let Err(e) = driver.write_frame(&frame) {
                self.counters.driver_errors.fetch_add(1, Ordering::Relaxed);
                warn_throttled!(self.throttler, "driver_write", "Driver write failed: {}", e);
            }
        }
        if let Some(relay) = self.relay.load_full() {
            relay.broadcast(frame);
        }

        self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
        Ok(SubmitOutcome::Forwarded { sequence })
    }

    pub fn status(&self) -> ManagerStatus {
        let state = self.state();
        let relay_status = self.relay.load_full().map(|relay| relay.status());
        let (target_fps, measured_fps) = {
            let pipeline = self.pipeline.lock();
            (pipeline.rate.target_fps(), pipeline.rate.measured_fps())
        };

        ManagerStatus {
            state,
            backend: *self.backend.read(),
            is_running: state == ManagerState::Active,
            port: relay_status.as_ref().and_then(|s| s.port),
            viewer_count: relay_status.as_ref().map(|s| s.viewer_count).unwrap_or(0),
            fps: relay_status.as_ref().map(|s| s.fps).unwrap_or(0.0),
            endpoints: self.endpoints(),
            frames_received: self.counters.received.load(Ordering::Relaxed),
            frames_forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            frames_skipped: self.counters.skipped.load(Ordering::Relaxed),
            driver_errors: self.counters.driver_errors.load(Ordering::Relaxed),
            target_fps,
            measured_fps,
        }
    }
}

impl FrameIngest for OutputManager {
    fn ingest(&self, data: Bytes, timestamp: DateTime<Utc>) -> SubmitResult {
        let result = self.submit(data, timestamp);
        if let Err(ref e) = result {
            debug_throttled!(self.throttler, "ingest", "Ingested frame rejected: {}", e);
        }
        result.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputConfig;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Default)]
    struct DriverLog {
        configured: Mutex<Option<(u32, u32, u32)>>,
        written: Mutex<Vec<u64>>,
        closed: AtomicBool,
    }

    #[derive(Clone, Copy, Default)]
    struct Faults {
        configure: bool,
        write: bool,
        close: bool,
    }

    struct FakeCamera {
        path: PathBuf,
        log: Arc<DriverLog>,
        faults: Faults,
    }

    impl VirtualCamera for FakeCamera {
        fn device(&self) -> &Path {
            &self.path
        }

        fn configure(&mut self, output: &OutputConfig) -> Result<()> {
            if self.faults.configure {
                return Err(AppError::Driver("format rejected".to_string()));
            }
            *self.log.configured.lock() = Some((output.width, output.height, output.fps));
            Ok(())
        }

        fn write_frame(&mut self, frame: &Frame) -> Result<()> {
            if self.faults.write {
                return Err(AppError::Driver("buffer full".to_string()));
            }
            self.log.written.lock().push(frame.sequence);
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.log.closed.store(true, Ordering::SeqCst);
            if self.faults.close {
                return Err(AppError::Driver("close failed".to_string()));
            }
            Ok(())
        }
    }

    enum FakeBackend {
        Native(Faults),
        RelayOnly,
        Diagnostic,
    }

    struct FakeProbe {
        backend: FakeBackend,
        log: Arc<DriverLog>,
    }

    impl BackendProbe for FakeProbe {
        fn detect(&self, _output: &OutputConfig) -> Backend {
            match self.backend {
                FakeBackend::Native(faults) => Backend::NativeDriver(Box::new(FakeCamera {
                    path: PathBuf::from("/dev/video-fake"),
                    log: self.log.clone(),
                    faults,
                })),
                FakeBackend::RelayOnly => Backend::RelayOnly,
                FakeBackend::Diagnostic => Backend::Diagnostic,
            }
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.relay.bind_address = "127.0.0.1".to_string();
        config.relay.preferred_port = 0;
        config
    }

    fn manager(backend: FakeBackend) -> (Arc<OutputManager>, Arc<DriverLog>) {
        manager_with_config(backend, test_config())
    }

    fn manager_with_config(backend: FakeBackend, config: AppConfig) -> (Arc<OutputManager>, Arc<DriverLog>) {
        let log = Arc::new(DriverLog::default());
        let probe = Arc::new(FakeProbe {
            backend,
            log: log.clone(),
        });
        (OutputManager::with_probe(config, probe), log)
    }

    fn jpeg() -> Bytes {
        Bytes::from_static(b"\xff\xd8\xff\xe0fake\xff\xd9")
    }

    /// Submit spaced well past the target interval so nothing is skipped
    async fn submit_spaced(manager: &OutputManager, count: usize) -> Vec<SubmitOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..count {
            outcomes.push(manager.submit(jpeg(), Utc::now()).unwrap());
            tokio::time::sleep(Duration::from_millis(45)).await;
        }
        outcomes
    }

    #[tokio::test]
    async fn test_stop_never_started() {
        let (manager, _) = manager(FakeBackend::Diagnostic);
        manager.stop().await.unwrap();
        assert_eq!(manager.state(), ManagerState::Idle);
    }

    #[tokio::test]
    async fn test_submit_requires_active() {
        let (manager, _) = manager(FakeBackend::Diagnostic);
        assert!(matches!(manager.submit(jpeg(), Utc::now()), Err(AppError::NotActive)));

        let result = manager.ingest(jpeg(), Utc::now());
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_start_twice_single_socket() {
        let (manager, _) = manager(FakeBackend::RelayOnly);
        manager.start().await.unwrap();
        let first = manager.status().port.unwrap();
        let relay = manager.relay().unwrap();

        manager.start().await.unwrap();
        assert_eq!(manager.status().port, Some(first));
        assert!(Arc::ptr_eq(&relay, &manager.relay().unwrap()));
        assert_eq!(manager.state(), ManagerState::Active);

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_relay_only_flow() {
        let (manager, _) = manager(FakeBackend::RelayOnly);
        manager.start().await.unwrap();

        let status = manager.status();
        assert_eq!(status.backend, Some(BackendKind::RelayOnly));
        assert!(status.is_running);
        let endpoints = status.endpoints.unwrap();
        assert_eq!(Some(endpoints.port), status.port);
        assert!(endpoints.ws_url.ends_with(&format!(":{}/ws", endpoints.port)));

        let relay = manager.relay().unwrap();
        let mut viewer = relay.on_connect();

        let outcome = manager.submit(jpeg(), Utc::now()).unwrap();
        assert_eq!(outcome, SubmitOutcome::Forwarded { sequence: 1 });
        let frame = viewer.try_next_frame().unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.data(), &jpeg()[..]);

        manager.stop().await.unwrap();
        assert!(!relay.is_running());
        assert!(manager.relay().is_none());
    }

    #[tokio::test]
    async fn test_skipped_is_success() {
        let (manager, _) = manager(FakeBackend::Diagnostic);
        manager.start().await.unwrap();

        assert!(!manager.submit(jpeg(), Utc::now()).unwrap().is_skipped());
        let outcome = manager.submit(jpeg(), Utc::now()).unwrap();
        assert_eq!(outcome, SubmitOutcome::Skipped);

        let result = manager.ingest(jpeg(), Utc::now());
        assert!(result.success);
        assert!(result.skipped);

        let status = manager.status();
        assert_eq!(status.frames_received, 3);
        assert_eq!(status.frames_forwarded, 1);
        assert_eq!(status.frames_skipped, 2);
        assert_eq!(manager.state(), ManagerState::Active);

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_native_driver_receives_frames() {
        let (manager, log) = manager(FakeBackend::Native(Faults::default()));
        manager.start().await.unwrap();

        assert_eq!(*log.configured.lock(), Some((1280, 720, 30)));
        let status = manager.status();
        assert_eq!(status.backend, Some(BackendKind::NativeDriver));
        // Diagnostic relay runs next to the driver
        assert!(status.port.is_some());

        submit_spaced(&manager, 3).await;
        assert_eq!(*log.written.lock(), vec![1, 2, 3]);
        assert_eq!(manager.relay().unwrap().latest_frame().unwrap().sequence, 3);

        manager.stop().await.unwrap();
        assert!(log.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_driver_configure_failure_releases_everything() {
        let faults = Faults {
            configure: true,
            ..Faults::default()
        };
        let (manager, log) = manager(FakeBackend::Native(faults));

        let err = manager.start().await.unwrap_err();
        assert!(matches!(err, AppError::Initialization(_)));
        assert_eq!(manager.state(), ManagerState::Idle);
        assert!(log.closed.load(Ordering::SeqCst));
        assert!(manager.relay().is_none());
        assert!(manager.status().port.is_none());

        // Stays usable for a retry
        assert!(matches!(manager.submit(jpeg(), Utc::now()), Err(AppError::NotActive)));
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_driver_write_failure_keeps_active() {
        let faults = Faults {
            write: true,
            ..Faults::default()
        };
        let (manager, _) = manager(FakeBackend::Native(faults));
        manager.start().await.unwrap();

        let outcomes = submit_spaced(&manager, 3).await;
        assert!(outcomes.iter().all(|o| !o.is_skipped()));
        let status = manager.status();
        assert_eq!(status.driver_errors, 3);
        assert_eq!(status.state, ManagerState::Active);

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_failure_still_idle() {
        let faults = Faults {
            close: true,
            ..Faults::default()
        };
        let (manager, log) = manager(FakeBackend::Native(faults));
        manager.start().await.unwrap();

        manager.stop().await.unwrap();
        assert!(log.closed.load(Ordering::SeqCst));
        assert_eq!(manager.state(), ManagerState::Idle);
        assert!(manager.relay().is_none());
    }

    #[tokio::test]
    async fn test_native_runs_without_relay_when_bind_fails() {
        let mut config = test_config();
        config.relay.bind_address = "not-an-address".to_string();
        let (manager, log) = manager_with_config(FakeBackend::Native(Faults::default()), config);

        manager.start().await.unwrap();
        assert!(manager.relay().is_none());
        assert!(manager.endpoints().is_none());

        manager.submit(jpeg(), Utc::now()).unwrap();
        assert_eq!(*log.written.lock(), vec![1]);
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_relay_bind_failure_is_initialization_error() {
        let mut config = test_config();
        config.relay.bind_address = "not-an-address".to_string();
        let (manager, _) = manager_with_config(FakeBackend::RelayOnly, config);

        let err = manager.start().await.unwrap_err();
        assert!(matches!(err, AppError::Initialization(_)));
        assert_eq!(manager.state(), ManagerState::Idle);
    }

    #[tokio::test]
    async fn test_port_fallback() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let taken = occupied.local_addr().unwrap().port();

        let mut config = test_config();
        config.relay.preferred_port = taken;
        let (manager, _) = manager_with_config(FakeBackend::RelayOnly, config);

        manager.start().await.unwrap();
        let endpoints = manager.endpoints().unwrap();
        assert_ne!(endpoints.port, taken);
        assert_eq!(manager.status().port, Some(endpoints.port));
        assert!(endpoints.endpoint_url.contains(&format!(":{}/", endpoints.port)));

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_resets_counters() {
        let (manager, _) = manager(FakeBackend::Diagnostic);
        manager.start().await.unwrap();
        manager.submit(jpeg(), Utc::now()).unwrap();
        manager.submit(jpeg(), Utc::now()).unwrap();

        manager.stop().await.unwrap();
        let status = manager.status();
        assert_eq!(status.frames_received, 0);
        assert_eq!(status.frames_skipped, 0);
        assert_eq!(status.target_fps, 30.0);
        assert!(status.backend.is_none());

        // Sequences restart with the next session
        manager.start().await.unwrap();
        assert_eq!(
            manager.submit(jpeg(), Utc::now()).unwrap(),
            SubmitOutcome::Forwarded { sequence: 1 }
        );
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_resolution() {
        let (manager, log) = manager(FakeBackend::Native(Faults::default()));
        manager.set_resolution(640, 480).unwrap();
        assert!(matches!(manager.set_resolution(0, 480), Err(AppError::BadRequest(_))));

        manager.start().await.unwrap();
        assert_eq!(*log.configured.lock(), Some((640, 480, 30)));
        assert!(matches!(
            manager.set_resolution(1920, 1080),
            Err(AppError::InvalidState(_))
        ));

        manager.stop().await.unwrap();
        manager.set_resolution(1920, 1080).unwrap();
        assert_eq!(manager.config().output.width, 1920);
    }

    #[tokio::test]
    async fn test_empty_frame_rejected() {
        let (manager, _) = manager(FakeBackend::Diagnostic);
        manager.start().await.unwrap();
        assert!(matches!(
            manager.submit(Bytes::new(), Utc::now()),
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(manager.state(), ManagerState::Active);
        manager.stop().await.unwrap();
    }
}
