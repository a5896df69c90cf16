//! Artemis camera pipeline, headless front-end.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use artemis::capture::V4l2Source;
use artemis::device::{DisplaySurface, FrameSink, SurfaceRegion};
use artemis::error::PresentError;
use artemis::pipeline::{GeometryRequest, PreviewPipeline, SinkFormat};
use artemis::{utils, Config};
use color_eyre::Result;
use tracing::{info, warn};

/// In-memory surface standing in for a native window. Sized square so the
/// same buffer fits both orientations of a rotated stream.
struct MemorySurface {
    pixels: Vec<u8>,
    side: u32,
    presented: u64,
}

impl MemorySurface {
    fn new(width: u32, height: u32) -> Self {
        let side = width.max(height);
        Self {
            pixels: vec![0; (side * side * 4) as usize],
            side,
            presented: 0,
        }
    }
}

impl DisplaySurface for MemorySurface {
    fn lock(&mut self) -> Result<SurfaceRegion<'_>, PresentError> {
        Ok(SurfaceRegion {
            pixels: &mut self.pixels,
            width: self.side,
            height: self.side,
            stride: (self.side * 4) as usize,
        })
    }

    fn unlock_and_present(&mut self) {
        self.presented += 1;
    }
}

impl Drop for MemorySurface {
    fn drop(&mut self) {
        info!(frames = self.presented, "surface released");
    }
}

struct LogSink;

impl FrameSink for LogSink {
    fn deliver(&self, data: &[u8]) {
        tracing::trace!(bytes = data.len(), "frame delivered");
    }
}

fn load_config() -> Config {
    let built = config::Config::builder()
        .add_source(config::File::with_name("artemis").required(false))
        .add_source(config::Environment::with_prefix("ARTEMIS").separator("__"))
        .build();
    match built.and_then(|c| c.try_deserialize::<Config>()) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "config load failed, using defaults");
            Config::default()
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("artemis=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Artemis launching...");

    let config = load_config();
    artemis::CONFIG.store(Arc::new(config.clone()));

    let device = if config.capture.device.path.is_empty() {
        utils::auto_detect_device()?
    } else {
        config.capture.device.clone()
    };
    info!("Using capture device: {:?}", device);

    let source = V4l2Source::open(&device.path)?.with_buffer_count(config.capture.buffer_count);

    let pipeline = PreviewPipeline::with_bounds(
        Box::new(source),
        config.pipeline.pool_size,
        config.pipeline.queue_depth,
    );
    pipeline.set_geometry(GeometryRequest {
        width: config.capture.width,
        height: config.capture.height,
        rotation_degrees: config.geometry.rotation_degrees,
        horizontal_mirror: config.geometry.horizontal_mirror,
        vertical_mirror: config.geometry.vertical_mirror,
        min_fps: config.capture.min_fps,
        max_fps: config.capture.max_fps,
        mode: device.mode,
    })?;
    pipeline.set_output_pixel_format(config.pipeline.output)?;
    pipeline.bind_display(Some(Box::new(MemorySurface::new(
        config.capture.width,
        config.capture.height,
    ))));
    pipeline.register_frame_callback(Arc::new(LogSink), SinkFormat::Raw);

    let params = pipeline.start()?;
    info!(
        width = params.width,
        height = params.height,
        fps = params.fps,
        "streaming"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::Release))?;
    }

    while !shutdown.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_secs(1));
        let (width, height) = pipeline.frame_size();
        info!(
            fps = pipeline.current_fps(),
            width,
            height,
            dropped = pipeline.dropped_frames(),
            "pipeline"
        );
    }

    pipeline.stop();
    info!(
        dropped = pipeline.dropped_frames(),
        pooled = pipeline.pool_occupancy(),
        "Artemis shutting down"
    );
    Ok(())
}
