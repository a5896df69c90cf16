use thiserror::Error;

use crate::convert::OutputFormat;
use crate::device::ControlId;
use crate::frame::PixelFormat;

/// Stream negotiation failures reported by the device collaborator.
#[derive(Debug, Clone, Error)]
pub enum NegotiationError {
    #[error("device rejected {width}x{height} @ {min_fps}-{max_fps} fps")]
    Unsupported {
        width: u32,
        height: u32,
        min_fps: u32,
        max_fps: u32,
    },
    #[error("device error during negotiation: {0}")]
    Device(String),
}

/// Pixel format conversion failures. Hot-path callers degrade to
/// "drop and continue"; unsupported pairs never reach a routine because
/// the dispatcher resolves them to `None` at bind time.
#[derive(Debug, Clone, Error)]
pub enum ConvertError {
    #[error("source frame is not valid {expected:?}")]
    BadInput { expected: PixelFormat },
    #[error("jpeg decode failed: {0}")]
    Decode(String),
}

/// Display surface presentation failures. A failed lock skips one frame's
/// presentation; streaming continues.
#[derive(Debug, Clone, Error)]
pub enum PresentError {
    #[error("surface lock failed")]
    LockFailed,
}

/// Device control (GET/SET) failures.
#[derive(Debug, Clone, Error)]
pub enum ControlError {
    #[error("control {0:?} is not supported by the device")]
    Unsupported(ControlId),
    #[error("device control transfer failed: {0}")]
    Device(String),
}

/// Setup-time pipeline failures surfaced synchronously to the caller.
/// Nothing in the frame hot path propagates across thread boundaries.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error("no conversion from {src:?} to {dst:?}")]
    ConversionUnsupported { src: PixelFormat, dst: OutputFormat },
    #[error("pipeline is already streaming")]
    AlreadyStreaming,
    #[error("capture device failed to start: {0}")]
    SourceStart(String),
    #[error("failed to spawn pipeline thread: {0}")]
    Thread(String),
    #[error("{0} is not a supported rotation angle")]
    InvalidRotation(u32),
}
