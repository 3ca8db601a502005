pub mod coordinator;
pub mod pool;

pub use coordinator::{PipelineCoordinator, PipelineStats};
pub use pool::{FrameBuffer, FrameBufferPool};
