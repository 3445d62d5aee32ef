//! Relay frame

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// An encoded frame on its way to the outputs
///
/// The payload is opaque to the relay and is never mutated; clones share
/// the underlying buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Bytes,
    /// Monotonic sequence assigned on forward
    pub sequence: u64,
    /// Capture timestamp supplied by the producer
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    pub fn new(data: Bytes, sequence: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            data,
            sequence,
            timestamp,
        }
    }

    /// Frame payload
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
