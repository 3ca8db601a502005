//! Source-format to RGBA conversion for captured frames.

use crate::capture::frame::PixelFormat;
use crate::error::SessionError;

/// Convert one captured buffer into tightly packed RGBA8888.
///
/// `dst` must be exactly `width * height * 4` bytes and is fully overwritten.
pub fn to_rgba(
    src: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
    dst: &mut [u8],
) -> Result<(), SessionError> {
    let expected = width as usize * height as usize * 4;
    if dst.len() != expected {
        return Err(SessionError::ConfigurationFailed(format!(
            "destination buffer is {} bytes, expected {}",
            dst.len(),
            expected
        )));
    }

    match format {
        PixelFormat::Rgba8 => {
            if src.len() < expected {
                return Err(truncated(format, src.len()));
            }
            dst.copy_from_slice(&src[..expected]);
        }
        PixelFormat::Rgb24 => {
            let needed = width as usize * height as usize * 3;
            if src.len() < needed {
                return Err(truncated(format, src.len()));
            }
            for (rgb, rgba) in src[..needed].chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
                rgba[0] = rgb[0];
                rgba[1] = rgb[1];
                rgba[2] = rgb[2];
                rgba[3] = 255;
            }
        }
        PixelFormat::Yuyv => {
            let needed = width as usize * height as usize * 2;
            if src.len() < needed {
                return Err(truncated(format, src.len()));
            }
            // YUYV packs two pixels per 4 bytes: Y0 U Y1 V
            for (yuyv, rgba) in src[..needed].chunks_exact(4).zip(dst.chunks_exact_mut(8)) {
                let (u, v) = (yuyv[1], yuyv[3]);
                yuv_to_rgba(yuyv[0], u, v, &mut rgba[..4]);
                yuv_to_rgba(yuyv[2], u, v, &mut rgba[4..]);
            }
        }
        PixelFormat::Mjpeg => {
            let mut decoder = zune_jpeg::JpegDecoder::new(src);
            let pixels = decoder
                .decode()
                .map_err(|e| SessionError::DeviceUnavailable(format!("JPEG decode: {e}")))?;
            let needed = width as usize * height as usize * 3;
            if pixels.len() < needed {
                return Err(truncated(format, pixels.len()));
            }
            for (rgb, rgba) in pixels[..needed]
                .chunks_exact(3)
                .zip(dst.chunks_exact_mut(4))
            {
                rgba[0] = rgb[0];
                rgba[1] = rgb[1];
                rgba[2] = rgb[2];
                rgba[3] = 255;
            }
        }
    }
    Ok(())
}

fn truncated(format: PixelFormat, len: usize) -> SessionError {
    SessionError::DeviceUnavailable(format!("truncated {format:?} frame: {len} bytes"))
}

/// BT.601 integer approximation.
fn yuv_to_rgba(y: u8, u: u8, v: u8, rgba: &mut [u8]) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    rgba[0] = ((298 * c + 409 * e + 128) >> 8).clamp(0, 255) as u8;
    rgba[1] = ((298 * c - 100 * d - 208 * e + 128) >> 8).clamp(0, 255) as u8;
    rgba[2] = ((298 * c + 516 * d + 128) >> 8).clamp(0, 255) as u8;
    rgba[3] = 255;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb24_expands_to_rgba() {
        let src = [10, 20, 30, 40, 50, 60];
        let mut dst = [0u8; 8];
        to_rgba(&src, PixelFormat::Rgb24, 2, 1, &mut dst).unwrap();
        assert_eq!(dst, [10, 20, 30, 255, 40, 50, 60, 255]);
    }

    #[test]
    fn yuyv_grey_midpoint() {
        // Y=128, U=V=128 is neutral grey in BT.601.
        let src = [128, 128, 128, 128];
        let mut dst = [0u8; 8];
        to_rgba(&src, PixelFormat::Yuyv, 2, 1, &mut dst).unwrap();
        for px in dst.chunks_exact(4) {
            assert_eq!(px[3], 255);
            assert!(px[0] == px[1] && px[1] == px[2], "grey expected: {px:?}");
            assert!((px[0] as i32 - 130).abs() <= 2);
        }
    }

    #[test]
    fn truncated_source_is_rejected() {
        let src = [0u8; 3];
        let mut dst = [0u8; 8];
        let err = to_rgba(&src, PixelFormat::Rgb24, 2, 1, &mut dst).unwrap_err();
        assert!(matches!(err, SessionError::DeviceUnavailable(_)));
    }

    #[test]
    fn wrong_destination_size_is_rejected() {
        let src = [0u8; 12];
        let mut dst = [0u8; 4];
        let err = to_rgba(&src, PixelFormat::Rgb24, 2, 1, &mut dst).unwrap_err();
        assert!(matches!(err, SessionError::ConfigurationFailed(_)));
    }
}
