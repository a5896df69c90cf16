//! The preview/capture pipeline.
//!
//! One producer (the device callback, on a thread we do not own) feeds two
//! consumer loops we do own: the render/transform loop and the
//! capture/delivery loop. Memory is bounded by the frame pool, the
//! depth-limited preview queue and the single-slot capture mailbox; under
//! load the pipeline sheds frames instead of growing or blocking the
//! producer.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use crate::convert::{self, Dispatcher, OutputFormat};
use crate::device::{
    DisplaySurface, FrameHandler, FrameSink, StreamMode, StreamParams, StreamRequest,
    SurfaceRegion, VideoSource,
};
use crate::error::PipelineError;
use crate::frame::{Frame, PixelFormat, RawFrame};
use crate::pipeline::queue::{BoundedQueue, PendingSlot};
use crate::pool::{FramePool, DEFAULT_POOL_SIZE};
use crate::transform::{Rotation, TransformEngine};

pub const DEFAULT_QUEUE_DEPTH: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Negotiating,
    Streaming,
    Draining,
}

/// Geometry and frame-rate requested via the control surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryRequest {
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u32,
    pub horizontal_mirror: bool,
    pub vertical_mirror: bool,
    pub min_fps: u32,
    pub max_fps: u32,
    pub mode: StreamMode,
}

impl Default for GeometryRequest {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            rotation_degrees: 0,
            horizontal_mirror: false,
            vertical_mirror: false,
            min_fps: 1,
            max_fps: 30,
            mode: StreamMode::Yuyv,
        }
    }
}

/// Settings the render loop reads at every frame boundary. Swapped
/// atomically so reconfiguration never blocks the hot path.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub rotation: Rotation,
    pub horizontal_mirror: bool,
    pub vertical_mirror: bool,
    pub output: OutputFormat,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            rotation: Rotation::None,
            horizontal_mirror: false,
            vertical_mirror: false,
            output: OutputFormat::Rgbx,
        }
    }
}

/// How frames are handed to a registered application callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFormat {
    /// Deliver whatever bytes the render path produced, unconverted.
    Raw,
    /// Convert for the callback before delivery.
    Converted(OutputFormat),
}

#[derive(Clone)]
struct SinkBinding {
    sink: Arc<dyn FrameSink>,
    format: SinkFormat,
}

struct Shared {
    running: AtomicBool,
    queue: BoundedQueue,
    slot: PendingSlot,
    pool: FramePool,
    settings: ArcSwap<RenderSettings>,
    display: Mutex<Option<Box<dyn DisplaySurface>>>,
    capture_display: Mutex<Option<Box<dyn DisplaySurface>>>,
    sink: Mutex<Option<SinkBinding>>,
    params: Mutex<Option<StreamParams>>,
    negotiated_width: AtomicU32,
    negotiated_height: AtomicU32,
    output_width: AtomicU32,
    output_height: AtomicU32,
    sequence: AtomicU64,
    fps: AtomicU32,
}

pub struct PreviewPipeline {
    source: Mutex<Box<dyn VideoSource>>,
    shared: Arc<Shared>,
    state: Mutex<PipelineState>,
    request: Mutex<StreamRequest>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl PreviewPipeline {
    pub fn new(source: Box<dyn VideoSource>) -> Self {
        Self::with_bounds(source, DEFAULT_POOL_SIZE, DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_bounds(source: Box<dyn VideoSource>, pool_bound: usize, queue_depth: usize) -> Self {
        Self {
            source: Mutex::new(source),
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                queue: BoundedQueue::new(queue_depth),
                slot: PendingSlot::new(),
                pool: FramePool::new(pool_bound),
                settings: ArcSwap::from_pointee(RenderSettings::default()),
                display: Mutex::new(None),
                capture_display: Mutex::new(None),
                sink: Mutex::new(None),
                params: Mutex::new(None),
                negotiated_width: AtomicU32::new(0),
                negotiated_height: AtomicU32::new(0),
                output_width: AtomicU32::new(0),
                output_height: AtomicU32::new(0),
                sequence: AtomicU64::new(0),
                fps: AtomicU32::new(0),
            }),
            state: Mutex::new(PipelineState::Idle),
            request: Mutex::new(StreamRequest {
                width: 640,
                height: 480,
                min_fps: 1,
                max_fps: 30,
                mode: StreamMode::Yuyv,
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Update geometry, rotation and mirroring. Rotation and mirror flags
    /// take effect from the next frame boundary; a resolution or mode
    /// change while streaming re-negotiates with the device.
    pub fn set_geometry(&self, geo: GeometryRequest) -> Result<(), PipelineError> {
        let rotation = Rotation::from_degrees(geo.rotation_degrees)
            .ok_or(PipelineError::InvalidRotation(geo.rotation_degrees))?;

        let needs_renegotiation = {
            let mut request = lock(&self.request);
            let changed = request.width != geo.width
                || request.height != geo.height
                || request.mode != geo.mode;
            request.width = geo.width;
            request.height = geo.height;
            request.min_fps = geo.min_fps;
            request.max_fps = geo.max_fps;
            request.mode = geo.mode;
            changed
        };

        self.shared.settings.rcu(|cur| RenderSettings {
            rotation,
            horizontal_mirror: geo.horizontal_mirror,
            vertical_mirror: geo.vertical_mirror,
            output: cur.output,
        });

        if needs_renegotiation && self.is_streaming() {
            debug!("resolution/mode change while streaming, re-negotiating");
            self.stop();
            self.start()?;
        }
        Ok(())
    }

    /// Negotiate with the device and bring up both consumer loops.
    pub fn start(&self) -> Result<StreamParams, PipelineError> {
        {
            let mut state = lock(&self.state);
            if *state != PipelineState::Idle {
                return Err(PipelineError::AlreadyStreaming);
            }
            *state = PipelineState::Negotiating;
        }

        let request = lock(&self.request).clone();
        let params = match lock(&self.source).negotiate(&request) {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, "stream negotiation failed");
                *lock(&self.state) = PipelineState::Idle;
                return Err(e.into());
            }
        };
        info!(
            width = params.width,
            height = params.height,
            fps = params.fps,
            format = ?params.format,
            "stream negotiated"
        );

        let shared = &self.shared;
        shared.negotiated_width.store(params.width, Ordering::Release);
        shared.negotiated_height.store(params.height, Ordering::Release);
        shared.output_width.store(params.width, Ordering::Release);
        shared.output_height.store(params.height, Ordering::Release);
        *lock(&shared.params) = Some(params);

        // YUYV frames arrive at 2 bytes/pixel; compressed modes convert to
        // 4-byte output, so warm the pool for the larger of the two.
        let frame_bytes = match params.format {
            PixelFormat::Mjpeg => (params.width * params.height * 4) as usize,
            f => (params.width * params.height * f.bytes_per_pixel().unwrap_or(2)) as usize,
        };
        shared.pool.pre_warm(shared.pool.bound(), frame_bytes);

        shared.queue.reopen();
        shared.slot.reopen();
        shared.running.store(true, Ordering::Release);
        shared.fps.store(0, Ordering::Release);

        let render = {
            let shared = self.shared.clone();
            std::thread::Builder::new()
                .name("artemis-render".into())
                .spawn(move || render_loop(&shared))
        };
        let capture = {
            let shared = self.shared.clone();
            std::thread::Builder::new()
                .name("artemis-capture".into())
                .spawn(move || capture_loop(&shared))
        };
        match (render, capture) {
            (Ok(render), Ok(capture)) => {
                let mut threads = lock(&self.threads);
                threads.push(render);
                threads.push(capture);
            }
            (render, capture) => {
                let err = render
                    .and(capture)
                    .err()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                self.teardown();
                return Err(PipelineError::Thread(err));
            }
        }

        let handler: FrameHandler = {
            let shared = self.shared.clone();
            Arc::new(move |raw: RawFrame<'_>| on_device_frame(&shared, raw))
        };
        if let Err(e) = lock(&self.source).start(handler) {
            self.teardown();
            return Err(PipelineError::SourceStart(e.to_string()));
        }

        *lock(&self.state) = PipelineState::Streaming;
        Ok(params)
    }

    /// Cooperative stop: flip the running flag, wake both loops, join them
    /// and recycle everything still in flight.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if !matches!(*state, PipelineState::Streaming) {
                return;
            }
            *state = PipelineState::Draining;
        }
        lock(&self.source).stop();
        self.teardown();
        debug!("pipeline drained");
    }

    fn teardown(&self) {
        let shared = &self.shared;
        shared.running.store(false, Ordering::Release);
        shared.queue.close();
        shared.slot.close();
        for handle in lock(&self.threads).drain(..) {
            let _ = handle.join();
        }
        shared.queue.flush(&shared.pool);
        shared.slot.flush(&shared.pool);
        *lock(&shared.display) = None;
        *lock(&shared.capture_display) = None;
        shared.fps.store(0, Ordering::Release);
        *lock(&self.state) = PipelineState::Idle;
    }

    pub fn bind_display(&self, surface: Option<Box<dyn DisplaySurface>>) {
        *lock(&self.shared.display) = surface;
    }

    pub fn bind_capture(&self, surface: Option<Box<dyn DisplaySurface>>) {
        *lock(&self.shared.capture_display) = surface;
    }

    /// Choose the display conversion target. While streaming, an
    /// unsupported pair for the negotiated source format is surfaced here
    /// once; the render loop presents unconverted bytes until a supported
    /// format is bound.
    pub fn set_output_pixel_format(&self, output: OutputFormat) -> Result<(), PipelineError> {
        self.shared.settings.rcu(|cur| RenderSettings {
            output,
            ..(**cur).clone()
        });
        if self.is_streaming() {
            if let Some(params) = *lock(&self.shared.params) {
                if convert::select(params.format, output).is_none() {
                    return Err(PipelineError::ConversionUnsupported {
                        src: params.format,
                        dst: output,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn register_frame_callback(&self, sink: Arc<dyn FrameSink>, format: SinkFormat) {
        *lock(&self.shared.sink) = Some(SinkBinding { sink, format });
    }

    pub fn clear_frame_callback(&self) {
        *lock(&self.shared.sink) = None;
    }

    /// Frames per wall-clock second measured by the render loop.
    pub fn current_fps(&self) -> u32 {
        self.shared.fps.load(Ordering::Acquire)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(*lock(&self.state), PipelineState::Streaming)
    }

    pub fn state(&self) -> PipelineState {
        *lock(&self.state)
    }

    /// Output frame dimensions, reflecting any configured rotation once a
    /// frame has been processed.
    pub fn frame_size(&self) -> (u32, u32) {
        (
            self.shared.output_width.load(Ordering::Acquire),
            self.shared.output_height.load(Ordering::Acquire),
        )
    }

    pub fn pool_occupancy(&self) -> usize {
        self.shared.pool.occupancy()
    }

    /// Frames shed by the preview queue's drop-oldest policy.
    pub fn dropped_frames(&self) -> usize {
        self.shared.queue.stats().2
    }
}

impl Drop for PreviewPipeline {
    fn drop(&mut self) {
        self.stop();
        self.shared.pool.drain();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Device-callback entry point. Runs on the collaborator's thread and must
/// never block: it validates geometry, duplicates the bytes into a pool
/// buffer and hands off to the bounded queue.
fn on_device_frame(shared: &Shared, raw: RawFrame<'_>) {
    if !shared.running.load(Ordering::Acquire) || raw.data.is_empty() {
        return;
    }
    let width = shared.negotiated_width.load(Ordering::Acquire);
    let height = shared.negotiated_height.load(Ordering::Acquire);
    if raw.width != width || raw.height != height {
        // expected during mode transitions; dropped silently
        metrics::counter!("geometry_mismatch_frames").increment(1);
        return;
    }
    let Some(mut copy) = shared.pool.acquire(raw.data.len()) else {
        metrics::counter!("callback_frames_dropped").increment(1);
        return;
    };
    copy.fill_from_raw(&raw);
    copy.sequence = shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
    shared.queue.push(copy, &shared.pool);
}

const FPS_WINDOW: Duration = Duration::from_secs(1);
const RENDER_WAIT: Duration = Duration::from_millis(250);

fn render_loop(shared: &Shared) {
    let mut engine = TransformEngine::new();
    let mut dispatcher = Dispatcher::new();
    let mut window_start = Instant::now();
    let mut frames_in_window: u32 = 0;

    loop {
        let Some(mut frame) = shared.queue.wait_pop_timeout(RENDER_WAIT) else {
            if !shared.running.load(Ordering::Acquire) {
                break;
            }
            // stalled producer: close the window so the reported rate
            // decays to zero instead of holding the last count
            if window_start.elapsed() >= FPS_WINDOW {
                shared.fps.store(frames_in_window, Ordering::Release);
                metrics::gauge!("preview_fps").set(frames_in_window as f64);
                frames_in_window = 0;
                window_start = Instant::now();
            }
            continue;
        };
        if !shared.running.load(Ordering::Acquire) {
            shared.pool.release(frame);
            break;
        }

        let settings = shared.settings.load_full();
        if frame.format == PixelFormat::Yuyv {
            engine.apply(
                &mut frame,
                settings.rotation,
                settings.horizontal_mirror,
                settings.vertical_mirror,
            );
        }
        shared.output_width.store(frame.width, Ordering::Release);
        shared.output_height.store(frame.height, Ordering::Release);

        let produced = render_one(shared, frame, settings.output, &mut dispatcher);
        shared.slot.publish(produced, &shared.pool);

        frames_in_window += 1;
        if window_start.elapsed() >= FPS_WINDOW {
            shared.fps.store(frames_in_window, Ordering::Release);
            metrics::gauge!("preview_fps").set(frames_in_window as f64);
            frames_in_window = 0;
            window_start = Instant::now();
        }
    }
}

/// Convert (when a routine is bound) and present one frame, returning the
/// frame that continues to the capture path.
fn render_one(
    shared: &Shared,
    frame: Frame,
    output: OutputFormat,
    dispatcher: &mut Dispatcher,
) -> Frame {
    let Some(func) = dispatcher.resolve(frame.format, output) else {
        // terminal for this binding: present the unconverted bytes
        present(&shared.display, &frame);
        return frame;
    };
    let Some(mut converted) = shared
        .pool
        .acquire(output.buffer_bytes(frame.width, frame.height))
    else {
        metrics::counter!("render_frames_dropped").increment(1);
        return frame;
    };
    match func(&frame, &mut converted) {
        Ok(()) => {
            present(&shared.display, &converted);
            shared.pool.release(frame);
            converted
        }
        Err(e) => {
            warn!(error = %e, "display conversion failed");
            shared.pool.release(converted);
            frame
        }
    }
}

fn capture_loop(shared: &Shared) {
    let mut dispatcher = Dispatcher::new();
    loop {
        let Some(frame) = shared.slot.wait_pop() else {
            if shared.running.load(Ordering::Acquire) {
                continue;
            }
            break;
        };
        if !shared.running.load(Ordering::Acquire) {
            shared.pool.release(frame);
            break;
        }
        present(&shared.capture_display, &frame);
        deliver(shared, &frame, &mut dispatcher);
        shared.pool.release(frame);
    }
}

/// True when the frame's bytes already have the layout the sink asked for.
fn already_packed(format: PixelFormat, output: OutputFormat) -> bool {
    matches!(
        (format, output),
        (PixelFormat::Rgbx, OutputFormat::Rgbx | OutputFormat::Rgba)
            | (PixelFormat::Rgb, OutputFormat::Rgb888)
            | (PixelFormat::Bgr, OutputFormat::Bgr888)
            | (PixelFormat::Rgb565, OutputFormat::Rgb565)
            | (PixelFormat::Gray8, OutputFormat::Luma8)
    )
}

fn deliver(shared: &Shared, frame: &Frame, dispatcher: &mut Dispatcher) {
    let binding = lock(&shared.sink).clone();
    let Some(binding) = binding else {
        return;
    };
    match binding.format {
        SinkFormat::Raw => binding.sink.deliver(frame.data()),
        SinkFormat::Converted(output) => {
            if already_packed(frame.format, output) {
                binding.sink.deliver(frame.data());
                return;
            }
            let Some(func) = dispatcher.resolve(frame.format, output) else {
                return;
            };
            let Some(mut converted) = shared
                .pool
                .acquire(output.buffer_bytes(frame.width, frame.height))
            else {
                metrics::counter!("callback_frames_dropped").increment(1);
                return;
            };
            match func(frame, &mut converted) {
                Ok(()) => binding.sink.deliver(converted.data()),
                Err(e) => warn!(error = %e, "callback conversion failed"),
            }
            shared.pool.release(converted);
        }
    }
}

/// Copy a frame into whichever surface is bound, honoring differing
/// strides. A lock failure skips this frame's presentation only.
fn present(display: &Mutex<Option<Box<dyn DisplaySurface>>>, frame: &Frame) {
    let mut guard = display.lock().unwrap_or_else(|e| e.into_inner());
    let Some(surface) = guard.as_mut() else {
        return;
    };
    match surface.lock() {
        Ok(region) => copy_to_region(frame, region),
        Err(_) => {
            metrics::counter!("present_failures").increment(1);
            return;
        }
    }
    surface.unlock_and_present();
}

fn copy_to_region(frame: &Frame, region: SurfaceRegion<'_>) {
    let src_step = frame.step as usize;
    if src_step == 0 || frame.width == 0 {
        return;
    }
    if src_step == region.stride {
        let n = frame.len().min(region.pixels.len());
        region.pixels[..n].copy_from_slice(&frame.data()[..n]);
        return;
    }
    let bytes_per_pixel = src_step / frame.width as usize;
    let row_bytes = src_step
        .min(region.width as usize * bytes_per_pixel)
        .min(region.stride);
    let rows = (frame.height as usize).min(region.height as usize);
    for (dst_row, src_row) in region
        .pixels
        .chunks_mut(region.stride.max(1))
        .zip(frame.data().chunks(src_step))
        .take(rows)
    {
        let n = row_bytes.min(dst_row.len()).min(src_row.len());
        dst_row[..n].copy_from_slice(&src_row[..n]);
    }
}
