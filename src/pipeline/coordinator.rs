//! Pipeline coordination: capture output -> processing -> render.
//!
//! The coordinator lives on the render context. Raw frames arrive over a
//! bounded channel from the capture context; lifecycle commands flow the
//! other way. It owns the ordering rules of the pipeline:
//!
//! - the session is only told to stream (`BindTarget`) once the surface
//!   reports ready;
//! - on teardown the session is closed, and observed closed, before the
//!   render target is destroyed;
//! - frames are submitted in non-decreasing sequence order, stale ones
//!   dropped;
//! - every per-frame failure drops that frame (its buffer returns to the
//!   pool) and the stream continues.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::capture::{Frame, SessionCommand, SessionState, SessionStateCell};
use crate::display::surface::{RenderBackend, RenderSurface};
use crate::error::FrameError;
use crate::pipeline::pool::FrameBufferPool;
use crate::process::Processor;

/// How long teardown waits for the capture context to acknowledge `Close`.
const CLOSE_WAIT: Duration = Duration::from_millis(250);

#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineStats {
    pub rendered: u64,
    pub dropped_no_target: u64,
    pub dropped_stale: u64,
    pub processing_failures: u64,
    pub render_failures: u64,
}

pub struct PipelineCoordinator<P: Processor, B: RenderBackend> {
    pool: FrameBufferPool,
    processor: P,
    surface: RenderSurface<B>,
    raw_rx: Receiver<Frame>,
    commands: Sender<SessionCommand>,
    session_state: Arc<SessionStateCell>,
    stats: PipelineStats,
}

impl<P: Processor, B: RenderBackend> PipelineCoordinator<P, B> {
    pub fn new(
        pool: FrameBufferPool,
        processor: P,
        raw_rx: Receiver<Frame>,
        commands: Sender<SessionCommand>,
        session_state: Arc<SessionStateCell>,
    ) -> Self {
        Self {
            pool,
            processor,
            surface: RenderSurface::new(),
            raw_rx,
            commands,
            session_state,
            stats: PipelineStats::default(),
        }
    }

    /// Forward the permission collaborator's verdict to the session.
    pub fn permission_result(&self, granted: bool) {
        let _ = self.commands.send(SessionCommand::Permission { granted });
    }

    /// The windowing collaborator produced a drawable surface. Only now may
    /// the session bind its output target and start streaming.
    pub fn surface_available(&mut self, backend: B, width: u32, height: u32) {
        self.surface.surface_ready(backend, width, height);
        let _ = self.commands.send(SessionCommand::BindTarget { width, height });
    }

    pub fn surface_size_changed(&mut self, width: u32, height: u32) {
        self.surface.surface_resized(width, height);
    }

    /// Tear down: close the session, wait for the capture context to let go,
    /// drain in-flight frames, then destroy the render target.
    ///
    /// Idempotent and safe to call mid-frame. Frames drained here are
    /// dropped, returning their buffers to the pool.
    pub fn surface_destroyed(&mut self) {
        let session_reachable = self.commands.send(SessionCommand::Close).is_ok();
        if session_reachable {
            self.wait_for_session_close();
        }

        let mut drained = 0u64;
        while let Ok(frame) = self.raw_rx.try_recv() {
            debug!("dropping in-flight frame {} on teardown", frame.meta.sequence);
            drained += 1;
        }
        if drained > 0 {
            info!("released {drained} in-flight frames on teardown");
        }

        self.surface.surface_destroyed();
    }

    /// No capture completion may reference a torn-down target, so the target
    /// outlives the session. The wait is bounded; a wedged capture context
    /// is logged, not waited on forever.
    fn wait_for_session_close(&self) {
        let deadline = Instant::now() + CLOSE_WAIT;
        loop {
            let state = self.session_state.get();
            if !matches!(state, SessionState::Streaming | SessionState::Closing) {
                return;
            }
            if Instant::now() >= deadline {
                warn!("session did not close within {CLOSE_WAIT:?} (state {state:?})");
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Drain pending raw frames through processing and rendering. Called
    /// from the render context, typically once per redraw.
    ///
    /// Processing is invoked one frame at a time, honoring the stage's
    /// single-concurrency declaration.
    pub fn pump(&mut self) {
        debug_assert!(self.processor.max_in_flight() >= 1);
        while let Ok(frame) = self.raw_rx.try_recv() {
            self.handle_frame(frame);
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        if !self.surface.is_ready() {
            // Dropped; the buffer returns to the pool when `frame` drops.
            self.stats.dropped_no_target += 1;
            metrics::counter!("frames_dropped_no_target").increment(1);
            return;
        }

        let processed = match self.processor.process(frame) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("processing failed, dropping frame: {e}");
                self.stats.processing_failures += 1;
                metrics::counter!("processing_failures").increment(1);
                return;
            }
        };

        if processed.meta.sequence < self.surface.last_sequence() {
            self.stats.dropped_stale += 1;
            metrics::counter!("frames_dropped_stale").increment(1);
            return;
        }

        match self.surface.render_frame(processed) {
            Ok(_) => self.stats.rendered += 1,
            Err(FrameError::StaleFrame { .. }) => self.stats.dropped_stale += 1,
            Err(FrameError::RenderTargetUnavailable) => self.stats.dropped_no_target += 1,
            Err(e) => {
                warn!("render failed, dropping frame: {e}");
                self.stats.render_failures += 1;
                metrics::counter!("render_failures").increment(1);
            }
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn pool(&self) -> &FrameBufferPool {
        &self.pool
    }

    pub fn surface_ready(&self) -> bool {
        self.surface.is_ready()
    }
}
