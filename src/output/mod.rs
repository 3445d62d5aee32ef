//! Native virtual camera bindings
//!
//! A [`VirtualCamera`] is a handle to an OS-level virtual camera device that
//! accepts encoded frames directly. Only Linux (v4l2loopback) has a binding;
//! on other platforms [`open_native`] reports the driver as unavailable and
//! the manager falls back to the relay.

#[cfg(target_os = "linux")]
pub mod v4l2loopback;

use std::path::Path;

use crate::config::{OutputConfig, ProbeConfig};
use crate::error::Result;
use crate::relay::Frame;

/// Native virtual camera driver binding
pub trait VirtualCamera: Send {
    /// Device the binding writes to
    fn device(&self) -> &Path;

    /// Apply the output format (size and rate)
    fn configure(&mut self, output: &OutputConfig) -> Result<()>;

    /// Write one encoded frame
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Release the device
    fn close(&mut self) -> Result<()>;
}

/// Open the platform's native virtual camera, if one is installed
#[cfg(target_os = "linux")]
pub fn open_native(config: &ProbeConfig) -> Result<Box<dyn VirtualCamera>> {
    let camera = v4l2loopback::LoopbackCamera::open(&config.device)?;
    Ok(Box::new(camera))
}

/// Open the platform's native virtual camera, if one is installed
#[cfg(not(target_os = "linux"))]
pub fn open_native(_config: &ProbeConfig) -> Result<Box<dyn VirtualCamera>> {
    Err(crate::error::AppError::Driver(
        "No native virtual camera binding on this platform".to_string(),
    ))
}
