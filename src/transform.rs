//! In-place geometric transforms over packed YUYV 4:2:2 frames.
//!
//! YUYV packs two horizontally adjacent luma samples with one shared chroma
//! pair per 4-byte macropixel. Rotating by 180 degrees or mirroring keeps
//! that sharing relationship intact; rotating by 90 or 270 degrees turns
//! horizontal neighbours into vertical ones, so every macropixel must be
//! decomposed and its two luma samples scattered across two destination
//! rows, each re-paired with a chroma sample taken from its own source row.
//!
//! The 90/270 chroma re-pairing here is chosen so that rotate90 followed by
//! rotate270 (and vice versa) reproduces the input byte-for-byte on
//! even-dimensioned frames.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::frame::{Frame, PixelFormat};

/// Clockwise rotation applied to each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }
}

/// Rotation/mirror engine owning a single scratch buffer.
///
/// Every transform writes into the scratch and then swaps it with the
/// frame's storage, so the displaced buffer becomes the scratch for the
/// next call and steady-state streaming reallocates nothing.
#[derive(Default)]
pub struct TransformEngine {
    scratch: Vec<u8>,
}

impl TransformEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the configured rotation and mirror flags. Non-YUYV frames and
    /// odd-dimensioned frames bypass the engine untouched.
    pub fn apply(
        &mut self,
        frame: &mut Frame,
        rotation: Rotation,
        horizontal_mirror: bool,
        vertical_mirror: bool,
    ) {
        if !Self::eligible(frame) {
            return;
        }
        match rotation {
            Rotation::None => {}
            Rotation::Cw90 => self.rotate90(frame),
            Rotation::Cw180 => self.rotate180(frame),
            Rotation::Cw270 => self.rotate270(frame),
        }
        if horizontal_mirror {
            self.mirror_horizontal(frame);
        }
        if vertical_mirror {
            self.mirror_vertical(frame);
        }
    }

    fn eligible(frame: &Frame) -> bool {
        if frame.format != PixelFormat::Yuyv {
            return false;
        }
        if frame.width % 2 != 0 || frame.height % 2 != 0 || frame.height == 0 {
            trace!(
                width = frame.width,
                height = frame.height,
                "odd-dimensioned yuyv frame bypasses transform"
            );
            return false;
        }
        frame.len() >= (frame.width * frame.height * 2) as usize
    }

    // Sized exactly so the post-swap payload length matches the frame.
    // Capacity is retained when shrinking.
    fn prepare_scratch(&mut self, len: usize) {
        self.scratch.resize(len, 0);
    }

    /// Rotate 90 degrees clockwise. Output width/height are swapped.
    pub fn rotate90(&mut self, frame: &mut Frame) {
        if !Self::eligible(frame) {
            return;
        }
        let (w, h) = (frame.width as usize, frame.height as usize);
        let len = w * h * 2;
        self.prepare_scratch(len);

        let src = &frame.data()[..len];
        let dst = &mut self.scratch[..len];
        let line = w * 2;
        let rline = h * 2;
        // Walk input columns left to right; each input macropixel column
        // becomes a pair of output rows. Input rows are consumed bottom-up
        // in pairs so the first output column holds the last input row.
        let mut di = 0;
        let final_line = (h - 2) * line;
        for wb in (0..line).step_by(4) {
            let start = final_line + wb;
            let mut off = 0;
            for _ in (0..h).step_by(2) {
                let even = start - off; // earlier (even) source row
                let odd = even + line; // later (odd) source row
                let next = di + rline;
                // first output row of the pair: lumas of source column wb/2,
                // chroma riding with the odd source row
                dst[di] = src[odd];
                dst[di + 1] = src[odd + 1];
                dst[di + 2] = src[even];
                dst[di + 3] = src[odd + 3];
                // second output row: lumas of the adjacent source column,
                // chroma riding with the even source row
                dst[next] = src[odd + 2];
                dst[next + 1] = src[even + 1];
                dst[next + 2] = src[even + 2];
                dst[next + 3] = src[even + 3];
                di += 4;
                off += line * 2;
            }
            di += rline;
        }

        frame.resize_payload(len);
        frame.swap_storage(&mut self.scratch);
        std::mem::swap(&mut frame.width, &mut frame.height);
        frame.step = frame.width * 2;
    }

    /// Rotate 270 degrees clockwise (90 counter-clockwise).
    ///
    /// Exact inverse of [`rotate90`](Self::rotate90): the chroma donor rows
    /// are swapped between the two output rows of each pair relative to the
    /// 90-degree mapping, which is what makes the round trip byte-exact.
    pub fn rotate270(&mut self, frame: &mut Frame) {
        if !Self::eligible(frame) {
            return;
        }
        let (w, h) = (frame.width as usize, frame.height as usize);
        let len = w * h * 2;
        self.prepare_scratch(len);

        let src = &frame.data()[..len];
        let dst = &mut self.scratch[..len];
        let line = w * 2;
        let rline = h * 2;
        // Input columns are consumed right to left; input rows top-down.
        let mut di = 0;
        let mut final_col = line - 4;
        for _ in (0..line).step_by(4) {
            let mut off = 0;
            for _ in (0..h).step_by(2) {
                let even = final_col + off;
                let odd = even + line;
                let next = di + rline;
                dst[di] = src[even + 2];
                dst[di + 1] = src[odd + 1];
                dst[di + 2] = src[odd + 2];
                dst[di + 3] = src[odd + 3];
                dst[next] = src[even];
                dst[next + 1] = src[even + 1];
                dst[next + 2] = src[odd];
                dst[next + 3] = src[even + 3];
                di += 4;
                off += line * 2;
            }
            final_col = final_col.wrapping_sub(4);
            di += rline;
        }

        frame.resize_payload(len);
        frame.swap_storage(&mut self.scratch);
        std::mem::swap(&mut frame.width, &mut frame.height);
        frame.step = frame.width * 2;
    }

    /// Rotate 180 degrees. Chroma sharing survives; macropixels are read
    /// back to front with the two luma samples swapped within each pair.
    pub fn rotate180(&mut self, frame: &mut Frame) {
        if !Self::eligible(frame) {
            return;
        }
        let (w, h) = (frame.width as usize, frame.height as usize);
        let len = w * h * 2;
        self.prepare_scratch(len);

        let src = &frame.data()[..len];
        let dst = &mut self.scratch[..len];
        let mut si = len - 4;
        let mut di = 0;
        loop {
            dst[di] = src[si + 2];
            dst[di + 1] = src[si + 1];
            dst[di + 2] = src[si];
            dst[di + 3] = src[si + 3];
            di += 4;
            if si == 0 {
                break;
            }
            si -= 4;
        }

        frame.resize_payload(len);
        frame.swap_storage(&mut self.scratch);
    }

    /// Mirror around the vertical axis. The two luma samples of each
    /// macropixel swap places because mirroring flips their left/right
    /// order without breaking their shared chroma pair.
    pub fn mirror_horizontal(&mut self, frame: &mut Frame) {
        if !Self::eligible(frame) {
            return;
        }
        let (w, h) = (frame.width as usize, frame.height as usize);
        let len = w * h * 2;
        self.prepare_scratch(len);

        let src = &frame.data()[..len];
        let dst = &mut self.scratch[..len];
        let line = w * 2;
        let mut row = 0;
        for _ in 0..h {
            for wb in (0..line).step_by(4) {
                dst[row + wb] = src[row + line - wb - 2];
                dst[row + wb + 1] = src[row + line - wb - 3];
                dst[row + wb + 2] = src[row + line - wb - 4];
                dst[row + wb + 3] = src[row + line - wb - 1];
            }
            row += line;
        }

        frame.resize_payload(len);
        frame.swap_storage(&mut self.scratch);
    }

    /// Mirror around the horizontal axis: a pure row-order reversal.
    pub fn mirror_vertical(&mut self, frame: &mut Frame) {
        if !Self::eligible(frame) {
            return;
        }
        let (w, h) = (frame.width as usize, frame.height as usize);
        let len = w * h * 2;
        self.prepare_scratch(len);

        let line = w * 2;
        let src = &frame.data()[..len];
        let dst = &mut self.scratch[..len];
        for (out_row, in_row) in dst.chunks_exact_mut(line).zip(src.chunks_exact(line).rev()) {
            out_row.copy_from_slice(in_row);
        }

        frame.resize_payload(len);
        frame.swap_storage(&mut self.scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yuyv_frame(width: u32, height: u32, seed: u64) -> Frame {
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let data: Vec<u8> = (0..(width * height * 2))
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect();
        Frame::new(width, height, PixelFormat::Yuyv, data)
    }

    #[test]
    fn rotate90_then_270_is_identity() {
        for (w, h) in [(2, 2), (4, 2), (6, 4), (16, 8), (64, 48)] {
            let mut engine = TransformEngine::new();
            let original = yuyv_frame(w, h, 11);
            let reference = original.data().to_vec();

            let mut frame = yuyv_frame(w, h, 11);
            engine.rotate90(&mut frame);
            assert_eq!((frame.width, frame.height), (h, w));
            assert_eq!(frame.step, h * 2);
            engine.rotate270(&mut frame);
            assert_eq!((frame.width, frame.height), (w, h));
            assert_eq!(frame.data(), &reference[..]);
        }
    }

    #[test]
    fn rotate270_then_90_is_identity() {
        for (w, h) in [(2, 4), (8, 6), (640, 480)] {
            let mut engine = TransformEngine::new();
            let reference = yuyv_frame(w, h, 23).data().to_vec();

            let mut frame = yuyv_frame(w, h, 23);
            engine.rotate270(&mut frame);
            engine.rotate90(&mut frame);
            assert_eq!(frame.data(), &reference[..]);
        }
    }

    #[test]
    fn rotate180_twice_is_identity() {
        let mut engine = TransformEngine::new();
        let reference = yuyv_frame(8, 6, 5).data().to_vec();
        let mut frame = yuyv_frame(8, 6, 5);
        engine.rotate180(&mut frame);
        assert_eq!((frame.width, frame.height), (8, 6));
        engine.rotate180(&mut frame);
        assert_eq!(frame.data(), &reference[..]);
    }

    #[test]
    fn mirrors_are_self_inverse() {
        let mut engine = TransformEngine::new();
        let reference = yuyv_frame(16, 8, 42).data().to_vec();

        let mut frame = yuyv_frame(16, 8, 42);
        engine.mirror_horizontal(&mut frame);
        engine.mirror_horizontal(&mut frame);
        assert_eq!(frame.data(), &reference[..]);

        engine.mirror_vertical(&mut frame);
        engine.mirror_vertical(&mut frame);
        assert_eq!(frame.data(), &reference[..]);
    }

    #[test]
    fn rotate90_moves_luma_clockwise() {
        // encode (x, y) in each luma sample, chroma zeroed
        let (w, h) = (6u32, 4u32);
        let mut data = vec![0u8; (w * h * 2) as usize];
        for y in 0..h {
            for x in 0..w {
                data[((y * w + x) * 2) as usize] = (y * 16 + x) as u8;
            }
        }
        let mut frame = Frame::new(w, h, PixelFormat::Yuyv, data);
        let mut engine = TransformEngine::new();
        engine.rotate90(&mut frame);

        let (rw, rh) = (frame.width, frame.height);
        assert_eq!((rw, rh), (h, w));
        for y in 0..rh {
            for x in 0..rw {
                let expected = ((h - 1 - x) * 16 + y) as u8;
                assert_eq!(frame.data()[((y * rw + x) * 2) as usize], expected);
            }
        }
    }

    #[test]
    fn mirror_vertical_reverses_rows() {
        let (w, h) = (4u32, 2u32);
        let mut data = vec![0u8; (w * h * 2) as usize];
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        let row0 = data[..8].to_vec();
        let row1 = data[8..].to_vec();

        let mut frame = Frame::new(w, h, PixelFormat::Yuyv, data);
        let mut engine = TransformEngine::new();
        engine.mirror_vertical(&mut frame);
        assert_eq!(&frame.data()[..8], &row1[..]);
        assert_eq!(&frame.data()[8..], &row0[..]);
    }

    #[test]
    fn non_yuyv_and_odd_dimensions_bypass() {
        let mut engine = TransformEngine::new();

        let rgb: Vec<u8> = (0..24).collect();
        let mut frame = Frame::new(2, 4, PixelFormat::Rgb, rgb.clone());
        engine.apply(&mut frame, Rotation::Cw90, true, true);
        assert_eq!(frame.data(), &rgb[..]);
        assert_eq!((frame.width, frame.height), (2, 4));

        let odd = vec![0u8; 3 * 2 * 2];
        let mut frame = Frame::new(3, 2, PixelFormat::Yuyv, odd.clone());
        engine.apply(&mut frame, Rotation::Cw180, false, false);
        assert_eq!(frame.data(), &odd[..]);
    }

    #[test]
    fn payload_length_tracks_the_transformed_frame() {
        let mut engine = TransformEngine::new();
        let mut big = yuyv_frame(64, 48, 1);
        engine.rotate180(&mut big);
        assert_eq!(big.len(), 64 * 48 * 2);

        // reusing the engine for a smaller frame must not leave stale
        // bytes past the logical image
        let mut small = yuyv_frame(4, 2, 2);
        engine.rotate90(&mut small);
        assert_eq!(small.len(), 4 * 2 * 2);
        assert_eq!((small.width, small.height), (2, 4));
    }

    #[test]
    fn rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(0), Some(Rotation::None));
        assert_eq!(Rotation::from_degrees(90), Some(Rotation::Cw90));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::Cw90));
        assert_eq!(Rotation::from_degrees(45), None);
    }
}
