pub mod gpu;
pub mod surface;

pub use gpu::WgpuBackend;
pub use surface::{RenderBackend, RenderSurface};
