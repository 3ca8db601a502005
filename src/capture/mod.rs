pub mod convert;
pub mod frame;
pub mod session;
pub mod v4l2;

pub use frame::{Frame, FrameMetadata, PixelFormat};
pub use session::{
    CaptureDevice, CaptureSession, DeviceFormat, RawCapture, SessionCommand, SessionState,
    SessionStateCell,
};
pub use v4l2::V4l2Device;
