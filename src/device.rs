//! Boundary traits for the external collaborators: the capture device, the
//! display surfaces, the application frame sink and the device control
//! endpoint. The pipeline consumes these interfaces only; enumeration,
//! descriptor parsing and the UVC control-transfer protocol live behind
//! them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, NegotiationError, PresentError};
use crate::frame::{PixelFormat, RawFrame};

/// Stream mode requested from the device, mirroring the two UVC transfer
/// formats we negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamMode {
    #[default]
    Yuyv,
    Mjpeg,
}

impl StreamMode {
    pub fn pixel_format(self) -> PixelFormat {
        match self {
            StreamMode::Yuyv => PixelFormat::Yuyv,
            StreamMode::Mjpeg => PixelFormat::Mjpeg,
        }
    }
}

/// Format/resolution/frame-rate match requested during negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub width: u32,
    pub height: u32,
    pub min_fps: u32,
    pub max_fps: u32,
    pub mode: StreamMode,
}

/// What the device actually agreed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
}

/// Handler invoked by the device collaborator for every arriving frame, on
/// a thread the pipeline does not own. It must return promptly; the device
/// reclaims the frame's storage as soon as it returns.
pub type FrameHandler = Arc<dyn Fn(RawFrame<'_>) + Send + Sync>;

/// The capture device collaborator.
pub trait VideoSource: Send {
    fn negotiate(&mut self, request: &StreamRequest) -> Result<StreamParams, NegotiationError>;

    /// Begin streaming, invoking `on_frame` for each arriving frame until
    /// [`stop`](Self::stop) is called.
    fn start(&mut self, on_frame: FrameHandler) -> Result<(), NegotiationError>;

    fn stop(&mut self);
}

/// A locked, writable window buffer.
pub struct SurfaceRegion<'a> {
    pub pixels: &'a mut [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes per row, including any padding.
    pub stride: usize,
}

/// The display-surface collaborator (the equivalent of a native window).
pub trait DisplaySurface: Send {
    fn lock(&mut self) -> Result<SurfaceRegion<'_>, PresentError>;
    fn unlock_and_present(&mut self);
}

/// The application callback collaborator. Invoked from the
/// capture/delivery thread; must not block indefinitely.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, data: &[u8]);
}

/// Camera controls exposed over the opaque device-control boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlId {
    Brightness,
    Contrast,
    Sharpness,
    Gain,
    WhiteBalance,
    Focus,
    Zoom,
    Exposure,
    PanAbsolute,
    TiltAbsolute,
}

impl ControlId {
    /// Pan and tilt are a paired control whose current value cannot be
    /// queried independently on many devices; the cache memoizes those.
    pub fn is_pan_tilt(self) -> bool {
        matches!(self, ControlId::PanAbsolute | ControlId::TiltAbsolute)
    }
}

/// Raw control endpoint: GET(min/max/default/current) and SET.
pub trait DeviceControl: Send {
    /// Query (min, max, default) for a control.
    fn range(&mut self, id: ControlId) -> Result<(i32, i32, i32), ControlError>;
    /// Query the current hardware value.
    fn get(&mut self, id: ControlId) -> Result<i32, ControlError>;
    /// Push a new value to the hardware.
    fn set(&mut self, id: ControlId, value: i32) -> Result<(), ControlError>;
}
