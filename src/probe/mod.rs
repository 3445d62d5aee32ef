//! Backend probe
//!
//! Detection order:
//! 1. Native virtual camera driver: if the binding opens, use it directly.
//! 2. Capture tool (OBS) installed or running: drive it through the relay.
//! 3. Neither: relay only, reported as diagnostic mode.
//!
//! Detection never fails. Errors and panics from the native binding count
//! as "not available".

pub mod capture_tool;

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, warn};

use crate::config::{OutputConfig, ProbeConfig};
use crate::output::{self, VirtualCamera};

/// Selected backend, with the driver binding when there is one
pub enum Backend {
    NativeDriver(Box<dyn VirtualCamera>),
    RelayOnly,
    Diagnostic,
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::NativeDriver(_) => BackendKind::NativeDriver,
            Backend::RelayOnly => BackendKind::RelayOnly,
            Backend::Diagnostic => BackendKind::Diagnostic,
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::NativeDriver(camera) => f
                .debug_tuple("NativeDriver")
                .field(&camera.device())
                .finish(),
            Backend::RelayOnly => f.write_str("RelayOnly"),
            Backend::Diagnostic => f.write_str("Diagnostic"),
        }
    }
}

/// Backend identifier reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    NativeDriver,
    RelayOnly,
    /// No native driver and no capture tool
    #[serde(rename = "none")]
    Diagnostic,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::NativeDriver => write!(f, "native_driver"),
            BackendKind::RelayOnly => write!(f, "relay_only"),
            BackendKind::Diagnostic => write!(f, "none"),
        }
    }
}

/// Backend detection
pub trait BackendProbe: Send + Sync {
    fn detect(&self, output: &OutputConfig) -> Backend;
}

/// Probe against the real host
pub struct SystemProbe {
    config: ProbeConfig,
}

impl SystemProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    fn try_native(&self) -> Option<Box<dyn VirtualCamera>> {
        if !self.config.native_enabled {
            debug!("Native driver disabled by configuration");
            return None;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| output::open_native(&self.config))) {
            Ok(Ok(camera)) => Some(camera),
            Ok(Err(e)) => {
                debug!("Native driver not available: {}", e);
                None
            }
            Err(_) => {
                warn!("Native driver binding panicked, treating as unavailable");
                None
            }
        }
    }
}

impl BackendProbe for SystemProbe {
    fn detect(&self, output: &OutputConfig) -> Backend {
        let backend = if let Some(camera) = self.try_native() {
            Backend::NativeDriver(camera)
        } else if capture_tool::detect(&self.config) {
            Backend::RelayOnly
        } else {
            Backend::Diagnostic
        };

        info!(
            backend = %backend.kind(),
            "Detected output backend for {}x{} @ {} fps",
            output.width,
            output.height,
            output.fps
        );
        backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_config(dir: &std::path::Path) -> ProbeConfig {
        ProbeConfig {
            native_enabled: true,
            device: dir.join("video10"),
            capture_tool_paths: vec![dir.join("obs")],
            capture_tool_processes: vec![],
        }
    }

    #[test]
    fn test_diagnostic_when_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let probe = SystemProbe::new(probe_config(dir.path()));
        let backend = probe.detect(&OutputConfig::default());
        assert_eq!(backend.kind(), BackendKind::Diagnostic);
    }

    #[test]
    fn test_relay_only_when_capture_tool_installed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("obs"), b"").unwrap();

        let probe = SystemProbe::new(probe_config(dir.path()));
        assert_eq!(probe.detect(&OutputConfig::default()).kind(), BackendKind::RelayOnly);
    }

    #[test]
    fn test_native_disabled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("video10"), b"").unwrap();

        let mut config = probe_config(dir.path());
        config.native_enabled = false;
        let probe = SystemProbe::new(config);
        assert_eq!(probe.detect(&OutputConfig::default()).kind(), BackendKind::Diagnostic);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_native_when_device_opens() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("video10"), b"").unwrap();

        let probe = SystemProbe::new(probe_config(dir.path()));
        match probe.detect(&OutputConfig::default()) {
            Backend::NativeDriver(camera) => {
                assert_eq!(camera.device(), dir.path().join("video10"));
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(serde_json::to_string(&BackendKind::NativeDriver).unwrap(), "\"native_driver\"");
        assert_eq!(serde_json::to_string(&BackendKind::RelayOnly).unwrap(), "\"relay_only\"");
        assert_eq!(serde_json::to_string(&BackendKind::Diagnostic).unwrap(), "\"none\"");
    }
}
