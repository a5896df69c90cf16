pub mod preview;
pub mod queue;

pub use preview::{
    GeometryRequest, PipelineState, PreviewPipeline, RenderSettings, SinkFormat,
};
pub use queue::{BoundedQueue, PendingSlot};
