//! Output manager data types

use serde::Serialize;

use crate::error::{AppError, Result};
use crate::probe::BackendKind;
use crate::relay::RelayEndpoints;

/// Manager lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl Default for ManagerState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagerState::Idle => write!(f, "idle"),
            ManagerState::Starting => write!(f, "starting"),
            ManagerState::Active => write!(f, "active"),
            ManagerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// What happened to a submitted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Sent to the outputs with this sequence number
    Forwarded { sequence: u64 },
    /// Dropped by the rate controller; not an error
    Skipped,
}

impl SubmitOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, SubmitOutcome::Skipped)
    }
}

/// Producer-facing submission result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitResult {
    pub success: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl SubmitResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            skipped: false,
            error: Some(error.into()),
            sequence: None,
        }
    }
}

impl From<Result<SubmitOutcome>> for SubmitResult {
    fn from(result: Result<SubmitOutcome>) -> Self {
        match result {
            Ok(SubmitOutcome::Forwarded { sequence }) => Self {
                success: true,
                skipped: false,
                error: None,
                sequence: Some(sequence),
            },
            Ok(SubmitOutcome::Skipped) => Self {
                success: true,
                skipped: true,
                error: None,
                sequence: None,
            },
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

impl From<AppError> for SubmitResult {
    fn from(e: AppError) -> Self {
        Self::failed(e.to_string())
    }
}

/// Manager status snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatus {
    pub state: ManagerState,
    pub backend: Option<BackendKind>,
    pub is_running: bool,
    /// Actually bound relay port
    pub port: Option<u16>,
    pub viewer_count: usize,
    /// Relay broadcasts per second
    pub fps: f64,
    pub endpoints: Option<RelayEndpoints>,
    pub frames_received: u64,
    pub frames_forwarded: u64,
    pub frames_skipped: u64,
    pub driver_errors: u64,
    pub target_fps: f64,
    pub measured_fps: Option<f64>,
}
