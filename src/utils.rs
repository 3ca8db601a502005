use std::path::Path;

use tracing::info;
use v4l::capability::Flags;
use v4l::Device;

use crate::error::SessionError;

/// Auto-detect the first device with video capture capability.
pub fn find_device() -> Result<String, SessionError> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }

        if let Ok(dev) = Device::with_path(&path) {
            if let Ok(caps) = dev.query_caps() {
                if caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                    info!("Found capture device: {} - {}", path, caps.card);
                    return Ok(path);
                }
            }
        }
    }

    Err(SessionError::DeviceUnavailable(
        "no suitable capture device found".into(),
    ))
}
