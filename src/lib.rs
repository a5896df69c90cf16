pub mod capture;
pub mod controls;
pub mod convert;
pub mod device;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod pool;
pub mod transform;
pub mod utils;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::convert::OutputFormat;
use crate::device::StreamMode;
use crate::utils::FoundDevice;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub geometry: GeometryConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub device: FoundDevice,
    pub width: u32,
    pub height: u32,
    pub min_fps: u32,
    pub max_fps: u32,
    pub mode: StreamMode,
    pub buffer_count: u32,
}

/// Orientation applied to each frame before presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryConfig {
    pub rotation_degrees: u32,
    pub horizontal_mirror: bool,
    pub vertical_mirror: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pool_size: usize,
    pub queue_depth: usize,
    pub output: OutputFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                device: FoundDevice::new("/dev/video0".into(), StreamMode::Yuyv),
                width: 640,
                height: 480,
                min_fps: 1,
                max_fps: 30,
                mode: StreamMode::Yuyv,
                buffer_count: 4,
            },
            geometry: GeometryConfig {
                rotation_degrees: 0,
                horizontal_mirror: false,
                vertical_mirror: false,
            },
            pipeline: PipelineConfig {
                pool_size: pool::DEFAULT_POOL_SIZE,
                queue_depth: pipeline::preview::DEFAULT_QUEUE_DEPTH,
                output: OutputFormat::Rgbx,
            },
        }
    }
}
