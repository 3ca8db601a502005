use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::pipeline::pool::FrameBuffer;

/// One captured image: pooled storage plus metadata.
///
/// A frame has exactly one owner at any time; hand-off between pipeline
/// stages is by move. Dropping a frame returns its storage to the pool.
pub struct Frame {
    /// Pixel data, exclusively owned by whichever stage holds the frame.
    pub buf: FrameBuffer,

    pub meta: FrameMetadata,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Monotonically increasing, assigned in capture-completion order.
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Pipeline interchange format; capture converts into this.
    Rgba8,
    Rgb24,
    Yuyv,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for uncompressed formats.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgba8 => Some(4),
            PixelFormat::Rgb24 => Some(3),
            PixelFormat::Yuyv => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }
}

impl Frame {
    /// Byte length of one RGBA frame at the given dimensions.
    pub fn rgba_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("format", &self.meta.format)
            .finish()
    }
}
