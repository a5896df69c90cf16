use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Yuyv,
    Uyvy,
    Mjpeg,
    Rgb,
    Bgr,
    Rgbx,
    Rgb565,
    Gray8,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats; `None` for compressed data.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Yuyv | PixelFormat::Uyvy | PixelFormat::Rgb565 => Some(2),
            PixelFormat::Rgb | PixelFormat::Bgr => Some(3),
            PixelFormat::Rgbx => Some(4),
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Mjpeg => None,
        }
    }
}

/// A borrowed view of a frame as handed over by the device callback.
///
/// The backing storage belongs to the device collaborator and is reclaimed
/// as soon as the callback returns, so the pipeline must duplicate the
/// bytes it wants to keep.
#[derive(Debug)]
pub struct RawFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub step: u32,
    pub format: PixelFormat,
    pub sequence: u64,
    pub metadata: Option<&'a [u8]>,
}

/// One video frame with pool-owned storage.
///
/// A frame is exclusively owned by whichever pipeline stage currently holds
/// it; hand-offs transfer ownership, never alias. The payload allocation may
/// exceed the logical size and is reused across fills.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row of the logical image.
    pub step: u32,
    pub format: PixelFormat,
    pub sequence: u64,
    pub timestamp: Instant,
    pub metadata: Option<Bytes>,
}

impl Frame {
    /// Allocate a frame with at least `capacity` bytes of storage.
    /// Returns `None` when the allocator cannot satisfy the request;
    /// callers treat that as "drop this frame", never as fatal.
    pub fn with_capacity(capacity: usize) -> Option<Self> {
        let mut data = Vec::new();
        if data.try_reserve_exact(capacity).is_err() {
            return None;
        }
        Some(Self {
            data,
            width: 0,
            height: 0,
            step: 0,
            format: PixelFormat::Yuyv,
            sequence: 0,
            timestamp: Instant::now(),
            metadata: None,
        })
    }

    /// Build a frame around an existing payload. The step is derived from
    /// the packed layout of `format`.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        let step = format.bytes_per_pixel().map_or(0, |b| width * b);
        Self {
            data,
            width,
            height,
            step,
            format,
            sequence: 0,
            timestamp: Instant::now(),
            metadata: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Grow or shrink the logical payload. Storage is never shrunk.
    pub fn resize_payload(&mut self, len: usize) {
        self.data.resize(len, 0);
    }

    /// Exchange the backing storage with `other` in O(1). Used by the
    /// transform engine's scratch-swap; no bytes are copied.
    pub(crate) fn swap_storage(&mut self, other: &mut Vec<u8>) {
        std::mem::swap(&mut self.data, other);
    }

    /// Duplicate a device frame into this frame's storage, preserving the
    /// declared color format.
    pub fn fill_from_raw(&mut self, raw: &RawFrame<'_>) {
        self.data.clear();
        self.data.extend_from_slice(raw.data);
        self.width = raw.width;
        self.height = raw.height;
        self.step = raw.step;
        self.format = raw.format;
        self.sequence = raw.sequence;
        self.timestamp = Instant::now();
        self.metadata = raw.metadata.map(Bytes::copy_from_slice);
    }

    /// Carry source metadata over to a conversion destination.
    pub fn inherit_meta(&mut self, src: &Frame) {
        self.sequence = src.sequence;
        self.timestamp = src.timestamp;
        self.metadata = src.metadata.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_preserved_across_fills() {
        let mut frame = Frame::with_capacity(64).unwrap();
        assert!(frame.capacity() >= 64);

        let payload = [7u8; 16];
        let raw = RawFrame {
            data: &payload,
            width: 4,
            height: 2,
            step: 8,
            format: PixelFormat::Yuyv,
            sequence: 3,
            metadata: None,
        };
        frame.fill_from_raw(&raw);
        assert_eq!(frame.len(), 16);
        assert!(frame.capacity() >= 64);
        assert_eq!(frame.sequence, 3);
        assert_eq!(frame.format, PixelFormat::Yuyv);
    }

    #[test]
    fn packed_pixel_sizes() {
        assert_eq!(PixelFormat::Yuyv.bytes_per_pixel(), Some(2));
        assert_eq!(PixelFormat::Rgbx.bytes_per_pixel(), Some(4));
        assert_eq!(PixelFormat::Mjpeg.bytes_per_pixel(), None);
    }
}
