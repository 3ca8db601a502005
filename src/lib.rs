pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod utils;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::process::EdgeAlgorithm;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub processing: ProcessingConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device path; empty means auto-detect the first suitable device.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Devices negotiating below this resolution are rejected.
    pub min_width: u32,
    pub min_height: u32,
    /// Driver-side mmap buffer count.
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub algorithm: EdgeAlgorithm,
    /// Gradient magnitudes below this are suppressed to black.
    pub threshold: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frame buffer pool capacity: at most this many frames in flight.
    pub pool_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            width: 1280,
            height: 720,
            fps: 30,
            min_width: 640,
            min_height: 480,
            buffer_count: 4,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            algorithm: EdgeAlgorithm::Sobel,
            threshold: 40,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            vsync: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { pool_capacity: 3 }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file is absent.
    pub fn load(path: &str) -> color_eyre::Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()?
            .try_deserialize()?;
        Ok(cfg)
    }
}
