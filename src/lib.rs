//! vcam-relay - low-latency frame output
//!
//! Takes encoded frames from an upstream producer and delivers them either
//! to a native virtual camera driver or to browser viewers through a
//! WebSocket relay, dropping frames rather than queueing them when a
//! consumer falls behind.

pub mod config;
pub mod error;
pub mod manager;
pub mod output;
pub mod probe;
pub mod rate;
pub mod relay;
pub mod utils;
pub mod web;

pub use error::{AppError, Result};
