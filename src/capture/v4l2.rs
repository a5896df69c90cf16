//! V4L2-backed capture source with memory-mapped streaming.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::device::{FrameHandler, StreamMode, StreamParams, StreamRequest, VideoSource};
use crate::error::NegotiationError;
use crate::frame::RawFrame;

const DEFAULT_BUFFER_COUNT: u32 = 4;

fn dev_err(e: std::io::Error) -> NegotiationError {
    NegotiationError::Device(e.to_string())
}

/// A UVC camera reached through the kernel's V4L2 interface. Frames are
/// dequeued on a dedicated thread and handed to the pipeline through the
/// registered [`FrameHandler`].
pub struct V4l2Source {
    device: Device,
    buffer_count: u32,
    params: Option<StreamParams>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl V4l2Source {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, NegotiationError> {
        let device = Device::with_path(path.as_ref()).map_err(dev_err)?;
        let caps = device.query_caps().map_err(dev_err)?;
        info!(card = %caps.card, driver = %caps.driver, "opened capture device");

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(NegotiationError::Device(format!(
                "{} does not support video capture",
                caps.card
            )));
        }
        Ok(Self {
            device,
            buffer_count: DEFAULT_BUFFER_COUNT,
            params: None,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    pub fn with_buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count.max(1);
        self
    }
}

impl VideoSource for V4l2Source {
    fn negotiate(&mut self, request: &StreamRequest) -> Result<StreamParams, NegotiationError> {
        let fourcc = match request.mode {
            StreamMode::Yuyv => FourCC::new(b"YUYV"),
            StreamMode::Mjpeg => FourCC::new(b"MJPG"),
        };

        let mut fmt = self.device.format().map_err(dev_err)?;
        fmt.width = request.width;
        fmt.height = request.height;
        fmt.fourcc = fourcc;
        let actual = self.device.set_format(&fmt).map_err(dev_err)?;

        if actual.fourcc != fourcc
            || actual.width != request.width
            || actual.height != request.height
        {
            return Err(NegotiationError::Unsupported {
                width: request.width,
                height: request.height,
                min_fps: request.min_fps,
                max_fps: request.max_fps,
            });
        }

        let agreed = self
            .device
            .set_params(&Parameters::with_fps(request.max_fps))
            .map_err(dev_err)?;
        let interval = agreed.interval;
        let fps = if interval.numerator > 0 {
            interval.denominator / interval.numerator
        } else {
            request.max_fps
        };
        if fps < request.min_fps {
            return Err(NegotiationError::Unsupported {
                width: request.width,
                height: request.height,
                min_fps: request.min_fps,
                max_fps: request.max_fps,
            });
        }

        let params = StreamParams {
            width: actual.width,
            height: actual.height,
            fps,
            format: request.mode.pixel_format(),
        };
        debug!(?params, "v4l2 format negotiated");
        self.params = Some(params);
        Ok(params)
    }

    fn start(&mut self, on_frame: FrameHandler) -> Result<(), NegotiationError> {
        let params = self
            .params
            .ok_or_else(|| NegotiationError::Device("stream not negotiated".into()))?;

        let mut stream: MmapStream<'static> =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)
                .map_err(dev_err)?;

        self.stop.store(false, Ordering::Release);
        let stop = self.stop.clone();
        let step = params
            .format
            .bytes_per_pixel()
            .map_or(0, |b| params.width * b);

        let worker = std::thread::Builder::new()
            .name("artemis-v4l2".into())
            .spawn(move || {
                let mut sequence: u64 = 0;
                while !stop.load(Ordering::Acquire) {
                    let (buf, meta) = match stream.next() {
                        Ok(next) => next,
                        Err(e) => {
                            warn!(error = %e, "v4l2 dequeue failed, capture thread exiting");
                            break;
                        }
                    };
                    sequence += 1;
                    // compressed frames fill only part of the mmap buffer
                    let used = meta.bytesused as usize;
                    let data = if used > 0 && used <= buf.len() {
                        &buf[..used]
                    } else {
                        buf
                    };
                    on_frame(RawFrame {
                        data,
                        width: params.width,
                        height: params.height,
                        step,
                        format: params.format,
                        sequence,
                        metadata: None,
                    });
                }
            })
            .map_err(|e| NegotiationError::Device(e.to_string()))?;
        self.worker = Some(worker);
        info!(buffers = self.buffer_count, "v4l2 capture stream started");
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        VideoSource::stop(self);
    }
}
