//! Shared helpers

pub mod net;
pub mod throttle;

pub use net::{bind_tcp_listener, bind_with_fallback};
pub use throttle::LogThrottler;
