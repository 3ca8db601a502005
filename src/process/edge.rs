//! Edge detection over RGBA frames.
//!
//! Pipeline per frame: grayscale, 3x3 Gaussian blur, then the configured
//! gradient operator. The result is written back into the frame's own buffer
//! as grayscale RGBA, fully overwriting whatever the previous slot owner
//! left there.

use tracing::instrument;

use crate::capture::{Frame, PixelFormat};
use crate::error::FrameError;
use crate::process::{EdgeAlgorithm, Processor};
use crate::ProcessingConfig;

pub struct EdgeDetector {
    algorithm: EdgeAlgorithm,
    threshold: u8,
    // Scratch planes reused across frames; the stage is single-concurrency.
    gray: Vec<u8>,
    blurred: Vec<u8>,
}

impl EdgeDetector {
    pub fn new(config: &ProcessingConfig) -> Self {
        Self {
            algorithm: config.algorithm,
            threshold: config.threshold,
            gray: Vec::new(),
            blurred: Vec::new(),
        }
    }
}

impl Processor for EdgeDetector {
    #[instrument(skip(self, frame), fields(sequence = frame.meta.sequence))]
    fn process(&mut self, mut frame: Frame) -> Result<Frame, FrameError> {
        let start = std::time::Instant::now();
        let (width, height) = (frame.meta.width as usize, frame.meta.height as usize);

        if frame.meta.format != PixelFormat::Rgba8 {
            return Err(FrameError::ProcessingFailed(format!(
                "unsupported input format {:?}",
                frame.meta.format
            )));
        }
        if frame.buf.len() != width * height * 4 {
            return Err(FrameError::ProcessingFailed(format!(
                "buffer is {} bytes for {}x{} RGBA",
                frame.buf.len(),
                width,
                height
            )));
        }
        if width < 3 || height < 3 {
            return Err(FrameError::ProcessingFailed(format!(
                "frame {width}x{height} too small for a 3x3 kernel"
            )));
        }

        self.gray.resize(width * height, 0);
        self.blurred.resize(width * height, 0);

        grayscale(&frame.buf, &mut self.gray);
        blur3(&self.gray, width, height, &mut self.blurred);
        match self.algorithm {
            EdgeAlgorithm::Sobel => {
                sobel(&self.blurred, width, height, self.threshold, &mut frame.buf)
            }
            EdgeAlgorithm::Laplacian => {
                laplacian(&self.blurred, width, height, self.threshold, &mut frame.buf)
            }
        }

        metrics::histogram!("process_time_us").record(start.elapsed().as_micros() as f64);
        Ok(frame)
    }
}

/// BT.601 luma, integer approximation.
fn grayscale(rgba: &[u8], gray: &mut [u8]) {
    for (px, y) in rgba.chunks_exact(4).zip(gray.iter_mut()) {
        *y = ((77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32) >> 8) as u8;
    }
}

/// 3x3 Gaussian (1 2 1 / 2 4 2 / 1 2 1) / 16, borders copied through.
fn blur3(src: &[u8], width: usize, height: usize, dst: &mut [u8]) {
    dst.copy_from_slice(src);
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut acc = 0u32;
            for (dy, row_w) in [(0usize, 1u32), (1, 2), (2, 1)] {
                let row = (y + dy - 1) * width + x;
                acc += row_w * (src[row - 1] as u32 + 2 * src[row] as u32 + src[row + 1] as u32);
            }
            dst[y * width + x] = (acc >> 4) as u8;
        }
    }
}

/// Sobel gradient magnitude, `(|gx| + |gy|) / 2` clamped, thresholded.
fn sobel(src: &[u8], width: usize, height: usize, threshold: u8, out: &mut [u8]) {
    out.fill(0);
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let up = (y - 1) * width + x;
            let mid = y * width + x;
            let down = (y + 1) * width + x;

            let gx = (src[up + 1] as i32 + 2 * src[mid + 1] as i32 + src[down + 1] as i32)
                - (src[up - 1] as i32 + 2 * src[mid - 1] as i32 + src[down - 1] as i32);
            let gy = (src[down - 1] as i32 + 2 * src[down] as i32 + src[down + 1] as i32)
                - (src[up - 1] as i32 + 2 * src[up] as i32 + src[up + 1] as i32);

            let mag = ((gx.abs().min(255) + gy.abs().min(255)) / 2) as u8;
            write_edge_px(out, mid, mag, threshold);
        }
    }
    fill_alpha(out);
}

/// 4-neighbor Laplacian, absolute value clamped, thresholded.
fn laplacian(src: &[u8], width: usize, height: usize, threshold: u8, out: &mut [u8]) {
    out.fill(0);
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mid = y * width + x;
            let lap = src[mid - width] as i32
                + src[mid + width] as i32
                + src[mid - 1] as i32
                + src[mid + 1] as i32
                - 4 * src[mid] as i32;
            let mag = lap.abs().min(255) as u8;
            write_edge_px(out, mid, mag, threshold);
        }
    }
    fill_alpha(out);
}

fn write_edge_px(out: &mut [u8], pixel: usize, mag: u8, threshold: u8) {
    let v = if mag < threshold { 0 } else { mag };
    let i = pixel * 4;
    out[i] = v;
    out[i + 1] = v;
    out[i + 2] = v;
}

fn fill_alpha(out: &mut [u8]) {
    for px in out.chunks_exact_mut(4) {
        px[3] = 255;
    }
}
