//! V4L2 capture backend with memory-mapped streaming

use std::time::Duration;

use tracing::{info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::PixelFormat;
use crate::capture::session::{CaptureDevice, DeviceFormat, RawCapture};
use crate::error::SessionError;
use crate::utils;
use crate::CaptureConfig;

/// Capture device on top of the v4l crate.
pub struct V4l2Device {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    config: CaptureConfig,
}

impl V4l2Device {
    /// Open the configured device path, or auto-detect the first suitable
    /// device. An `EACCES` from the driver surfaces as `PermissionDenied`.
    pub fn open(config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>, SessionError> {
        let path = if config.device.is_empty() {
            utils::find_device()?
        } else {
            config.device.clone()
        };
        info!("Initializing V4L2 capture: {path}");

        let device = Device::with_path(&path).map_err(map_open_err)?;
        let caps = device
            .query_caps()
            .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(SessionError::DeviceUnavailable(
                "device doesn't support video capture".into(),
            ));
        }

        Ok(Box::new(Self {
            device: Box::new(device),
            stream: None,
            config: config.clone(),
        }))
    }

    fn pick_format(&self) -> Result<(FourCC, PixelFormat), SessionError> {
        let formats = self
            .device
            .enum_formats()
            .map_err(|e| SessionError::ConfigurationFailed(e.to_string()))?;
        // Prefer MJPEG for bandwidth, then uncompressed formats.
        for (fourcc, source) in [
            (FourCC::new(b"MJPG"), PixelFormat::Mjpeg),
            (FourCC::new(b"YUYV"), PixelFormat::Yuyv),
            (FourCC::new(b"RGB3"), PixelFormat::Rgb24),
        ] {
            if formats.iter().any(|f| f.fourcc == fourcc) {
                return Ok((fourcc, source));
            }
        }
        Err(SessionError::ConfigurationFailed(
            "no supported pixel format (MJPG/YUYV/RGB3)".into(),
        ))
    }
}

impl CaptureDevice for V4l2Device {
    fn configure(
        &mut self,
        _target_width: u32,
        _target_height: u32,
    ) -> Result<DeviceFormat, SessionError> {
        let (fourcc, source) = self.pick_format()?;

        let mut fmt = self
            .device
            .format()
            .map_err(|e| SessionError::ConfigurationFailed(e.to_string()))?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;
        fmt.fourcc = fourcc;

        // The driver may adjust the request; the returned format is
        // authoritative.
        let actual = self
            .device
            .set_format(&fmt)
            .map_err(|e| SessionError::ConfigurationFailed(e.to_string()))?;

        let params = v4l::video::capture::Parameters::with_fps(self.config.fps);
        if let Err(e) = self.device.set_params(&params) {
            warn!("driver rejected {} fps: {e}", self.config.fps);
        }

        Ok(DeviceFormat {
            width: actual.width,
            height: actual.height,
            source,
        })
    }

    fn start(&mut self) -> Result<(), SessionError> {
        let stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.config.buffer_count)
                .map_err(|e| SessionError::ConfigurationFailed(e.to_string()))?;
        self.stream = Some(stream);
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }

    fn capture(&mut self) -> Result<RawCapture<'_>, SessionError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SessionError::ConfigurationFailed("stream not started".into()))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?;

        // Compressed formats fill only part of the mmap'd buffer.
        let used = meta.bytesused as usize;
        let data = if used > 0 && used <= buf.len() {
            &buf[..used]
        } else {
            buf
        };

        Ok(RawCapture {
            data,
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            ),
        })
    }
}

fn map_open_err(e: std::io::Error) -> SessionError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        SessionError::PermissionDenied
    } else {
        SessionError::DeviceUnavailable(e.to_string())
    }
}
