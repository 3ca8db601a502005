//! Error taxonomy for the pipeline.
//!
//! Session-level errors are fatal for that session instance; per-frame errors
//! are dropped and counted without stopping the stream.

use thiserror::Error;

/// Fatal for the session instance. Recovery requires a new [`CaptureSession`].
///
/// [`CaptureSession`]: crate::capture::CaptureSession
#[derive(Debug, Error)]
pub enum SessionError {
    /// Surfaced to the permission collaborator, not treated as a pipeline
    /// failure.
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("session configuration failed: {0}")]
    ConfigurationFailed(String),

    /// Event arrived in a state that cannot accept it.
    #[error("invalid session event {event} in state {state:?}")]
    InvalidTransition {
        event: &'static str,
        state: crate::capture::SessionState,
    },
}

/// Per-frame, recoverable. The owning frame is dropped and the stream
/// continues with the next capture.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("processing failed: {0}")]
    ProcessingFailed(String),

    #[error("render target unavailable")]
    RenderTargetUnavailable,

    #[error("frame {sequence} is stale, newest submitted {newest}")]
    StaleFrame { sequence: u64, newest: u64 },

    #[error("render submission failed: {0}")]
    RenderFailed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// All slots are owned. The caller drops the incoming frame.
    #[error("frame buffer pool exhausted")]
    Busy,

    /// The buffer does not belong to this pool or its slot is not owned.
    #[error("released buffer is not tracked by this pool")]
    InvalidRelease,
}
