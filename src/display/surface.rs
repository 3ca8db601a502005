//! Render surface lifecycle over a swappable backend.
//!
//! The surface tracks the target's existence and viewport; the actual GPU
//! work lives behind [`RenderBackend`]. Frames are submitted in
//! non-decreasing sequence order and their buffers return to the pool once
//! the draw is submitted (the frame is dropped here).

use tracing::{debug, info};

use crate::capture::Frame;
use crate::error::FrameError;

/// GPU-facing half of the render stage.
pub trait RenderBackend {
    /// Viewport-only update; the GPU context is preserved.
    fn resize(&mut self, width: u32, height: u32);

    /// Draw one frame. Returns once the submission is queued, not
    /// necessarily presented.
    fn submit(&mut self, frame: &Frame) -> Result<(), FrameError>;
}

pub struct RenderSurface<B: RenderBackend> {
    backend: Option<B>,
    viewport: (u32, u32),
    last_sequence: u64,
}

impl<B: RenderBackend> RenderSurface<B> {
    pub fn new() -> Self {
        Self {
            backend: None,
            viewport: (0, 0),
            last_sequence: 0,
        }
    }

    /// (Re)create the render target. A backend arriving while one already
    /// exists replaces it (the old target is torn down).
    pub fn surface_ready(&mut self, backend: B, width: u32, height: u32) {
        info!("render surface ready: {width}x{height}");
        self.backend = Some(backend);
        self.viewport = (width, height);
    }

    /// Viewport-only update, GPU context preserved.
    pub fn surface_resized(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
        if let Some(backend) = self.backend.as_mut() {
            debug!("render viewport resized: {width}x{height}");
            backend.resize(width, height);
        }
    }

    /// Draw the frame and release its buffer back to the pool.
    ///
    /// The caller is responsible for never passing an older frame after a
    /// newer one; a stale sequence is rejected here and the frame dropped.
    pub fn render_frame(&mut self, frame: Frame) -> Result<u64, FrameError> {
        let sequence = frame.meta.sequence;

        let Some(backend) = self.backend.as_mut() else {
            return Err(FrameError::RenderTargetUnavailable);
        };
        if sequence < self.last_sequence {
            return Err(FrameError::StaleFrame {
                sequence,
                newest: self.last_sequence,
            });
        }

        backend.submit(&frame)?;
        self.last_sequence = sequence;
        metrics::histogram!("frame_latency_ms").record(frame.timestamp.elapsed().as_millis() as f64);
        // Dropping the frame returns its slot to the pool.
        Ok(sequence)
    }

    /// Release the render target. Idempotent, safe mid-frame.
    pub fn surface_destroyed(&mut self) {
        if self.backend.take().is_some() {
            info!("render surface destroyed");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// Highest sequence number submitted so far.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}

impl<B: RenderBackend> Default for RenderSurface<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat};
    use crate::pipeline::pool::FrameBufferPool;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingBackend {
        submitted: Vec<u64>,
        resizes: Vec<(u32, u32)>,
        fail_next: bool,
    }

    impl RenderBackend for RecordingBackend {
        fn resize(&mut self, width: u32, height: u32) {
            self.resizes.push((width, height));
        }

        fn submit(&mut self, frame: &Frame) -> Result<(), FrameError> {
            if self.fail_next {
                self.fail_next = false;
                return Err(FrameError::RenderFailed("lost".into()));
            }
            self.submitted.push(frame.meta.sequence);
            Ok(())
        }
    }

    fn frame(pool: &FrameBufferPool, sequence: u64) -> Frame {
        Frame {
            buf: pool.acquire(16).unwrap(),
            meta: FrameMetadata {
                sequence,
                width: 2,
                height: 2,
                stride: 8,
                format: PixelFormat::Rgba8,
                device_timestamp: None,
            },
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn render_without_target_is_unavailable() {
        let pool = FrameBufferPool::new(1);
        let mut surface = RenderSurface::<RecordingBackend>::new();
        let err = surface.render_frame(frame(&pool, 1)).unwrap_err();
        assert!(matches!(err, FrameError::RenderTargetUnavailable));
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn frames_submit_in_order_and_release() {
        let pool = FrameBufferPool::new(2);
        let mut surface = RenderSurface::new();
        surface.surface_ready(RecordingBackend::default(), 640, 480);

        surface.render_frame(frame(&pool, 1)).unwrap();
        surface.render_frame(frame(&pool, 2)).unwrap();
        assert_eq!(surface.last_sequence(), 2);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn stale_frame_is_rejected_and_released() {
        let pool = FrameBufferPool::new(2);
        let mut surface = RenderSurface::new();
        surface.surface_ready(RecordingBackend::default(), 640, 480);

        surface.render_frame(frame(&pool, 5)).unwrap();
        let err = surface.render_frame(frame(&pool, 3)).unwrap_err();
        assert!(matches!(
            err,
            FrameError::StaleFrame {
                sequence: 3,
                newest: 5
            }
        ));
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(surface.last_sequence(), 5);
    }

    #[test]
    fn resize_updates_viewport_only() {
        let mut surface = RenderSurface::new();
        surface.surface_ready(RecordingBackend::default(), 640, 480);
        surface.surface_resized(800, 600);
        assert_eq!(surface.viewport(), (800, 600));
        assert!(surface.is_ready());
    }

    #[test]
    fn destroy_is_idempotent_and_blocks_render() {
        let pool = FrameBufferPool::new(1);
        let mut surface = RenderSurface::new();
        surface.surface_ready(RecordingBackend::default(), 640, 480);
        surface.surface_destroyed();
        surface.surface_destroyed();
        assert!(!surface.is_ready());
        let err = surface.render_frame(frame(&pool, 1)).unwrap_err();
        assert!(matches!(err, FrameError::RenderTargetUnavailable));
    }

    #[test]
    fn failed_submit_releases_frame_and_keeps_order_counter() {
        let pool = FrameBufferPool::new(1);
        let mut surface = RenderSurface::new();
        surface.surface_ready(
            RecordingBackend {
                fail_next: true,
                ..Default::default()
            },
            640,
            480,
        );
        let err = surface.render_frame(frame(&pool, 1)).unwrap_err();
        assert!(matches!(err, FrameError::RenderFailed(_)));
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(surface.last_sequence(), 0);
    }
}
