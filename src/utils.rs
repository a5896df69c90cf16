use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::device::StreamMode;

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub mode: StreamMode,
}

impl FoundDevice {
    pub fn new(path: String, mode: StreamMode) -> Self {
        Self { path, mode }
    }
}

/// Auto-detect best capture device
pub fn auto_detect_device() -> Result<FoundDevice> {
    use std::path::Path;

    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        let mut yuyv = false;
        for fmt in formats {
            if fmt.fourcc == FourCC::new(b"MJPG") {
                info!("Found MJPEG device: {} - {}", path, caps.card);
                return Ok(FoundDevice::new(path, StreamMode::Mjpeg));
            }
            yuyv |= fmt.fourcc == FourCC::new(b"YUYV");
        }
        if yuyv {
            info!("Found YUYV device: {} - {}", path, caps.card);
            return Ok(FoundDevice::new(path, StreamMode::Yuyv));
        }
    }

    Err(eyre!("No suitable capture device found"))
}
