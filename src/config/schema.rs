use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Output format handed to the native driver
    pub output: OutputConfig,
    /// Frame pacing
    pub rate: RateConfig,
    /// Browser relay server
    pub relay: RelayConfig,
    /// Backend detection
    pub probe: ProbeConfig,
}

impl AppConfig {
    /// Reject values the output pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.output.width == 0 || self.output.height == 0 {
            return Err(AppError::Config(format!(
                "resolution must be non-zero, got {}x{}",
                self.output.width, self.output.height
            )));
        }
        if self.output.fps == 0 {
            return Err(AppError::Config("fps must be non-zero".to_string()));
        }
        if self.rate.min_fps == 0 || self.rate.min_fps > self.output.fps {
            return Err(AppError::Config(format!(
                "min_fps must be within 1..={}, got {}",
                self.output.fps, self.rate.min_fps
            )));
        }
        check_unit_interval("rate.drop_threshold", self.rate.drop_threshold)?;
        check_unit_interval("rate.smoothing", self.rate.smoothing)?;
        check_unit_interval("rate.adapt", self.rate.adapt)?;
        if self.relay.send_timeout_ms == 0 {
            return Err(AppError::Config("relay.send_timeout_ms must be non-zero".to_string()));
        }
        self.relay.bind_ip()?;
        Ok(())
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(AppError::Config(format!("{} must be within (0, 1], got {}", name, value)))
    }
}

/// Output format configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frame rate ceiling
    pub fps: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// Rate controller tuning
///
/// The defaults were tuned against real producers; treat them as starting
/// points rather than fixed constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateConfig {
    /// Lowest target rate the controller decays to
    pub min_fps: u32,
    /// Fraction of the target interval that must elapse before forwarding
    pub drop_threshold: f64,
    /// Weight of the newest interval in the moving average
    pub smoothing: f64,
    /// Fraction of the gap the target moves per submission
    pub adapt: f64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            min_fps: 15,
            drop_threshold: 0.8,
            smoothing: 0.1,
            adapt: 0.1,
        }
    }
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen address
    pub bind_address: String,
    /// Host used in reported URLs (defaults to the bind address)
    pub advertise_host: Option<String>,
    /// Preferred port (0 = ephemeral)
    pub preferred_port: u16,
    /// Ports tried after the preferred one, before an ephemeral port
    pub fallback_ports: Vec<u16>,
    /// Bound on a single frame write to a viewer
    pub send_timeout_ms: u64,
    /// Interval of the stats side-channel message
    pub stats_interval_ms: u64,
    /// Bound on waiting for the HTTP server to shut down
    pub shutdown_timeout_ms: u64,
    /// Largest accepted ingest body
    pub max_frame_bytes: usize,
    /// Accept frames over HTTP/WebSocket from out-of-process producers
    pub ingest_enabled: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            advertise_host: None,
            preferred_port: 0,
            fallback_ports: Vec::new(),
            send_timeout_ms: 50,
            stats_interval_ms: 2000,
            shutdown_timeout_ms: 1000,
            max_frame_bytes: 16 * 1024 * 1024,
            ingest_enabled: true,
        }
    }
}

impl RelayConfig {
    pub fn bind_ip(&self) -> Result<std::net::IpAddr> {
        self.bind_address
            .parse()
            .map_err(|_| AppError::Config(format!("Invalid bind address: {}", self.bind_address)))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(100))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Backend detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Try the native virtual camera driver
    pub native_enabled: bool,
    /// Native driver device node
    pub device: PathBuf,
    /// Capture tool installation paths (empty = platform defaults)
    pub capture_tool_paths: Vec<PathBuf>,
    /// Capture tool process names
    pub capture_tool_processes: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            native_enabled: true,
            device: PathBuf::from("/dev/video10"),
            capture_tool_paths: Vec::new(),
            capture_tool_processes: vec![
                "obs".to_string(),
                "obs64".to_string(),
                "obs-studio".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.output.fps, 30);
        assert_eq!(config.rate.min_fps, 15);
        assert_eq!(config.relay.preferred_port, 0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"output":{"width":640},"relay":{"preferred_port":9000}}"#)
                .unwrap();
        assert_eq!(config.output.width, 640);
        assert_eq!(config.output.height, 720);
        assert_eq!(config.relay.preferred_port, 9000);
        assert_eq!(config.relay.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.output.width = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rate.min_fps = 60;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rate.drop_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.relay.bind_address = "not-an-ip".to_string();
        assert!(config.validate().is_err());
    }
}
