pub mod edge;

pub use edge::EdgeDetector;

use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::error::FrameError;

/// Opaque frame-processing contract.
///
/// Ownership of the frame transfers in on call and back out on return. On
/// error the frame is consumed; its buffer returns to the pool and the
/// coordinator continues with the next capture.
pub trait Processor: Send {
    /// How many frames the coordinator may pipeline through this stage.
    /// Defaults to one: process frame k before frame k+1 is submitted.
    fn max_in_flight(&self) -> usize {
        1
    }

    fn process(&mut self, frame: Frame) -> Result<Frame, FrameError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeAlgorithm {
    Sobel,
    Laplacian,
}
