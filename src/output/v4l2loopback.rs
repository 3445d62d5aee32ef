//! v4l2loopback output device
//!
//! Frames are written to the loopback node as MJPEG, one `write` per frame.
//! Requires the v4l2loopback kernel module, e.g.
//! `modprobe v4l2loopback devices=1 video_nr=10 exclusive_caps=1`.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use v4l::format::FieldOrder;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

use super::VirtualCamera;
use crate::config::OutputConfig;
use crate::error::{AppError, Result};
use crate::relay::Frame;

const MJPEG: &[u8; 4] = b"MJPG";

/// Output format for one MJPEG frame of the given size
fn mjpeg_format(output: &OutputConfig) -> Format {
    let mut fmt = Format::new(output.width, output.height, FourCC::new(MJPEG));
    fmt.field_order = FieldOrder::Progressive;
    // Upper bound for one compressed frame
    fmt.size = output.width.saturating_mul(output.height).saturating_mul(2);
    fmt
}

/// v4l2loopback virtual camera
pub struct LoopbackCamera {
    path: PathBuf,
    /// Frame writer
    device: Option<File>,
    /// Control handle holding the negotiated output format
    control: Option<Device>,
}

impl LoopbackCamera {
    /// Open the loopback node for writing, non-blocking
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AppError::Driver(format!(
                "v4l2loopback device {} not found",
                path.display()
            )));
        }

        let device = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| AppError::Driver(format!("Failed to open {}: {}", path.display(), e)))?;

        debug!("Opened v4l2loopback device {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            device: Some(device),
            control: None,
        })
    }

    fn device_mut(&mut self) -> Result<&mut File> {
        self.device
            .as_mut()
            .ok_or_else(|| AppError::Driver(format!("{} is closed", self.path.display())))
    }
}

impl VirtualCamera for LoopbackCamera {
    fn device(&self) -> &Path {
        &self.path
    }

    fn configure(&mut self, output: &OutputConfig) -> Result<()> {
        if self.device.is_none() {
            return Err(AppError::Driver(format!("{} is closed", self.path.display())));
        }

        let control = Device::with_path(&self.path).map_err(|e| {
            AppError::Driver(format!("Failed to open {} for control: {}", self.path.display(), e))
        })?;

        let actual = Output::set_format(&control, &mjpeg_format(output)).map_err(|e| {
            AppError::Driver(format!(
                "Failed to set output format on {}: {}",
                self.path.display(),
                e
            ))
        })?;

        if actual.fourcc != FourCC::new(MJPEG) {
            return Err(AppError::Driver(format!(
                "{} refused MJPEG output (got {})",
                self.path.display(),
                actual.fourcc
            )));
        }
        if actual.width != output.width || actual.height != output.height {
            warn!(
                "Requested {}x{}, got {}x{}",
                output.width, output.height, actual.width, actual.height
            );
        }

        info!(
            "v4l2loopback {} configured: MJPEG {}x{} @ {} fps",
            self.path.display(),
            actual.width,
            actual.height,
            output.fps
        );
        self.control = Some(control);
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let device = self.device_mut()?;
        device.write_all(frame.data()).map_err(|e| {
            if e.kind() == ErrorKind::WouldBlock {
                AppError::Driver("Device buffer full, frame dropped".to_string())
            } else {
                AppError::Driver(format!("Write failed: {}", e))
            }
        })
    }

    fn close(&mut self) -> Result<()> {
        self.control = None;
        if self.device.take().is_some() {
            debug!("Closed v4l2loopback device {}", self.path.display());
        }
        Ok(())
    }
}
