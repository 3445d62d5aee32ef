//! Browser frame relay
//!
//! Fans the latest frame out to any number of independently connected,
//! independently slow viewers.
//!
//! # Components
//!
//! - `FrameRelay` - listening socket, viewer registry, broadcast
//! - `ViewerSession` / `ViewerHandle` - per-viewer state and frame slot
//! - `RateWindow` - rolling one-second rate counter

pub mod frame;
pub mod server;
pub mod session;
pub mod stats;

pub use frame::Frame;
pub use server::{FrameIngest, FrameRelay, RelayEndpoints};
pub use session::{SessionId, ViewerHandle, ViewerSession};
pub use stats::{RateWindow, RelayStats, RelayStatus, ViewerStats};
