//! Capture session state machine.
//!
//! The session owns the capture device behind the [`CaptureDevice`] trait and
//! walks an explicit state machine:
//!
//! ```text
//! Uninitialized -> Opening -> Configuring -> Streaming -> Closing -> Closed
//!                     \            \             \
//!                      +---------- Error --------+
//! ```
//!
//! `Error` is terminal for the session instance; recovery is a new session.
//! All events are methods; completions are strictly serialized because the
//! session is driven from a single capture context.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::capture::convert;
use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::error::SessionError;
use crate::pipeline::pool::FrameBufferPool;
use crate::CaptureConfig;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized = 0,
    Opening = 1,
    Configuring = 2,
    Streaming = 3,
    Closing = 4,
    Closed = 5,
    Error = 6,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Uninitialized,
            1 => Self::Opening,
            2 => Self::Configuring,
            3 => Self::Streaming,
            4 => Self::Closing,
            5 => Self::Closed,
            _ => Self::Error,
        }
    }
}

/// Lock-free mirror of the session state, readable from the render context.
pub struct SessionStateCell(AtomicU8);

impl SessionStateCell {
    fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Capture format negotiated by the device.
#[derive(Debug, Clone, Copy)]
pub struct DeviceFormat {
    pub width: u32,
    pub height: u32,
    /// Format of the bytes the device hands back; converted to RGBA before
    /// entering the pipeline.
    pub source: PixelFormat,
}

/// One completed capture, borrowed from the device until the next call.
pub struct RawCapture<'a> {
    pub data: &'a [u8],
    pub device_timestamp: Option<Duration>,
}

/// Device backend driven by the session.
pub trait CaptureDevice: Send {
    /// Bind the render target's backing size and negotiate a capture format.
    fn configure(&mut self, target_width: u32, target_height: u32)
        -> Result<DeviceFormat, SessionError>;

    /// Begin streaming.
    fn start(&mut self) -> Result<(), SessionError>;

    /// Block on the capture context until the next completed capture.
    fn capture(&mut self) -> Result<RawCapture<'_>, SessionError>;
}

/// Opens a device once permission is granted. Boxed so tests can substitute
/// synthetic devices.
pub type DeviceOpener =
    Box<dyn FnMut(&CaptureConfig) -> Result<Box<dyn CaptureDevice>, SessionError> + Send>;

/// Lifecycle events delivered from the coordinator to the capture context.
#[derive(Debug, Clone, Copy)]
pub enum SessionCommand {
    Permission { granted: bool },
    BindTarget { width: u32, height: u32 },
    Close,
}

pub struct CaptureSession {
    state: SessionState,
    shared: Arc<SessionStateCell>,
    config: CaptureConfig,
    opener: DeviceOpener,
    device: Option<Box<dyn CaptureDevice>>,
    format: Option<DeviceFormat>,
    /// Target bound before the device finished opening; applied on reaching
    /// `Configuring`.
    pending_target: Option<(u32, u32)>,
    sequence: u64,
    frames_dropped: u64,
    decode_failures: u64,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig, opener: DeviceOpener) -> Self {
        Self {
            state: SessionState::Uninitialized,
            shared: Arc::new(SessionStateCell::new(SessionState::Uninitialized)),
            config,
            opener,
            device: None,
            format: None,
            pending_target: None,
            sequence: 0,
            frames_dropped: 0,
            decode_failures: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Shared state cell for observers on other contexts.
    pub fn shared_state(&self) -> Arc<SessionStateCell> {
        Arc::clone(&self.shared)
    }

    /// Frames dropped because the pool was exhausted.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn apply(&mut self, cmd: SessionCommand) -> Result<(), SessionError> {
        match cmd {
            SessionCommand::Permission { granted } => self.permission_result(granted),
            SessionCommand::BindTarget { width, height } => self.bind_target(width, height),
            SessionCommand::Close => {
                self.close();
                Ok(())
            }
        }
    }

    /// Outcome of the permission request. Granted opens the device and moves
    /// the session to `Configuring`; denied is terminal.
    pub fn permission_result(&mut self, granted: bool) -> Result<(), SessionError> {
        if self.state != SessionState::Uninitialized {
            return Err(SessionError::InvalidTransition {
                event: "permission_result",
                state: self.state,
            });
        }
        if !granted {
            self.set_state(SessionState::Error);
            return Err(SessionError::PermissionDenied);
        }

        self.set_state(SessionState::Opening);
        match (self.opener)(&self.config) {
            Ok(device) => {
                self.device = Some(device);
                self.set_state(SessionState::Configuring);
                info!("capture device opened");
                if let Some((width, height)) = self.pending_target.take() {
                    self.bind_target(width, height)?;
                }
                Ok(())
            }
            Err(e) => {
                warn!("failed to open capture device: {e}");
                self.set_state(SessionState::Error);
                Err(e)
            }
        }
    }

    /// Bind the render target's backing size and start streaming.
    ///
    /// Arriving before the device is open, the target is stashed and applied
    /// once the session reaches `Configuring`. Arriving during `Streaming`
    /// (a window resize) only affects the viewport, so it is ignored here.
    pub fn bind_target(&mut self, width: u32, height: u32) -> Result<(), SessionError> {
        match self.state {
            SessionState::Uninitialized | SessionState::Opening => {
                self.pending_target = Some((width, height));
                Ok(())
            }
            SessionState::Configuring => self.configure_and_start(width, height),
            other => {
                debug!("bind_target ignored in state {other:?}");
                Ok(())
            }
        }
    }

    fn configure_and_start(&mut self, width: u32, height: u32) -> Result<(), SessionError> {
        let (min_width, min_height) = (self.config.min_width, self.config.min_height);
        let result = (|| {
            let device = self
                .device
                .as_mut()
                .ok_or_else(|| SessionError::ConfigurationFailed("device not open".into()))?;
            let format = device.configure(width, height)?;
            if format.width < min_width || format.height < min_height {
                return Err(SessionError::ConfigurationFailed(format!(
                    "negotiated {}x{} below minimum {}x{}",
                    format.width, format.height, min_width, min_height
                )));
            }
            device.start()?;
            Ok(format)
        })();

        match result {
            Ok(format) => {
                info!(
                    "capture streaming at {}x{} ({:?})",
                    format.width, format.height, format.source
                );
                self.format = Some(format);
                self.set_state(SessionState::Streaming);
                Ok(())
            }
            Err(e) => {
                warn!("session configuration failed: {e}");
                self.set_state(SessionState::Error);
                Err(e)
            }
        }
    }

    /// One capture completion: acquire a pool slot, convert into it, assign
    /// the next sequence number.
    ///
    /// `Ok(None)` means no frame was produced: the session is not streaming,
    /// the pool was exhausted (frame dropped, counter incremented) or the
    /// source bytes failed to decode. Never blocks on the pool.
    pub fn capture_frame(&mut self, pool: &FrameBufferPool) -> Result<Option<Frame>, SessionError> {
        if self.state != SessionState::Streaming {
            return Ok(None);
        }
        let Some(format) = self.format else {
            return Ok(None);
        };
        let len = Frame::rgba_len(format.width, format.height);

        let Some(device) = self.device.as_mut() else {
            return Ok(None);
        };
        let raw = match device.capture() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("capture failed: {e}");
                self.set_state(SessionState::Error);
                return Err(e);
            }
        };
        let timestamp = Instant::now();
        let device_timestamp = raw.device_timestamp;

        let mut buf = match pool.acquire(len) {
            Ok(buf) => buf,
            Err(_) => {
                // Backpressure: downstream still owns every slot, so this
                // completion is dropped and superseded by the next one.
                self.frames_dropped += 1;
                metrics::counter!("capture_frames_dropped").increment(1);
                return Ok(None);
            }
        };

        if let Err(e) = convert::to_rgba(raw.data, format.source, format.width, format.height, &mut buf)
        {
            // Corrupt source bytes are a per-frame condition, not a session
            // failure. The slot goes back to the pool when `buf` drops.
            warn!("frame conversion failed: {e}");
            self.decode_failures += 1;
            metrics::counter!("capture_decode_failures").increment(1);
            return Ok(None);
        }

        self.sequence += 1;
        Ok(Some(Frame {
            buf,
            meta: FrameMetadata {
                sequence: self.sequence,
                width: format.width,
                height: format.height,
                stride: format.width * 4,
                format: PixelFormat::Rgba8,
                device_timestamp,
            },
            timestamp,
        }))
    }

    /// Release the device and move to `Closed`. Idempotent, safe from any
    /// state including mid-frame.
    pub fn close(&mut self) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        info!("closing capture session");
        self.set_state(SessionState::Closing);
        self.device = None;
        self.format = None;
        self.pending_target = None;
        self.set_state(SessionState::Closed);
    }

    fn set_state(&mut self, state: SessionState) {
        debug!("session state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.shared.set(state);
    }
}
