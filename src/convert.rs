//! Pixel-format conversion routines and the per-stream dispatcher.
//!
//! YUV to RGB uses the full-range BT.601 integer approximation with
//! fixed-point coefficients scaled by 2^14 (22987, -5636, -11698, 29049),
//! matching an arithmetic right shift by 14 after the multiply. All loops
//! pair source and destination through `chunks_exact`, so neither side can
//! be overrun even when one buffer carries padding.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConvertError;
use crate::frame::{Frame, PixelFormat};

/// Destination formats a consumer can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    /// 4-byte RGB with the fourth byte fixed to opaque.
    Rgba,
    Rgbx,
    Rgb565,
    Rgb888,
    Bgr888,
    /// Luma-only 1-byte plane.
    Luma8,
    /// Interleaved chroma 1-byte plane.
    Chroma8,
}

impl OutputFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            OutputFormat::Rgba | OutputFormat::Rgbx => 4,
            OutputFormat::Rgb565 => 2,
            OutputFormat::Rgb888 | OutputFormat::Bgr888 => 3,
            OutputFormat::Luma8 | OutputFormat::Chroma8 => 1,
        }
    }

    pub fn buffer_bytes(self, width: u32, height: u32) -> usize {
        (width * height * self.bytes_per_pixel()) as usize
    }

    pub(crate) fn pixel_format(self) -> PixelFormat {
        match self {
            OutputFormat::Rgba | OutputFormat::Rgbx => PixelFormat::Rgbx,
            OutputFormat::Rgb888 => PixelFormat::Rgb,
            OutputFormat::Bgr888 => PixelFormat::Bgr,
            OutputFormat::Luma8 | OutputFormat::Chroma8 => PixelFormat::Gray8,
            OutputFormat::Rgb565 => PixelFormat::Rgb565,
        }
    }
}

pub type ConvertFn = fn(&Frame, &mut Frame) -> Result<(), ConvertError>;

/// Map a (source, destination) pair to its conversion routine, or `None`
/// when the pair is unsupported. This is the single source of truth the
/// dispatcher memoizes.
pub fn select(src: PixelFormat, dst: OutputFormat) -> Option<ConvertFn> {
    use OutputFormat as O;
    use PixelFormat as P;
    match (src, dst) {
        (P::Yuyv, O::Rgba | O::Rgbx) => Some(yuyv_to_rgbx),
        (P::Yuyv, O::Rgb565) => Some(yuyv_to_rgb565),
        (P::Yuyv, O::Rgb888) => Some(yuyv_to_rgb),
        (P::Yuyv, O::Bgr888) => Some(yuyv_to_bgr),
        (P::Yuyv, O::Luma8) => Some(yuyv_to_luma),
        (P::Yuyv, O::Chroma8) => Some(yuyv_to_chroma),
        (P::Uyvy, O::Rgba | O::Rgbx) => Some(uyvy_to_rgbx),
        (P::Uyvy, O::Rgb888) => Some(uyvy_to_rgb),
        (P::Uyvy, O::Bgr888) => Some(uyvy_to_bgr),
        (P::Mjpeg, O::Rgba | O::Rgbx) => Some(mjpeg_to_rgbx),
        (P::Mjpeg, O::Rgb888) => Some(mjpeg_to_rgb),
        (P::Mjpeg, O::Rgb565) => Some(mjpeg_to_rgb565),
        (P::Rgb, O::Rgba | O::Rgbx) => Some(rgb_to_rgbx),
        (P::Rgb, O::Rgb888) => Some(copy_frame),
        (P::Rgbx, O::Rgba | O::Rgbx) => Some(copy_frame),
        (P::Bgr, O::Bgr888) => Some(copy_frame),
        _ => None,
    }
}

/// Memoized (source, destination) lookup. The table walk happens once per
/// format negotiation, not per frame; a changed pair re-resolves and the
/// "unsupported" outcome is logged a single time.
#[derive(Default)]
pub struct Dispatcher {
    cached: Option<(PixelFormat, OutputFormat, Option<ConvertFn>)>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, src: PixelFormat, dst: OutputFormat) -> Option<ConvertFn> {
        if let Some((s, d, func)) = self.cached {
            if s == src && d == dst {
                return func;
            }
        }
        let func = select(src, dst);
        if func.is_none() {
            warn!(?src, ?dst, "no pixel conversion for format pair");
        }
        self.cached = Some((src, dst, func));
        func
    }
}

#[inline]
fn sat(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline]
fn bt601_offsets(u: i32, v: i32) -> (i32, i32, i32) {
    let r = (22987 * (v - 128)) >> 14;
    let g = (-5636 * (u - 128) - 11698 * (v - 128)) >> 14;
    let b = (29049 * (u - 128)) >> 14;
    (r, g, b)
}

fn check_input(src: &Frame, expected: PixelFormat) -> Result<(), ConvertError> {
    if src.format != expected {
        return Err(ConvertError::BadInput { expected });
    }
    Ok(())
}

fn prepare_dst(
    src: &Frame,
    dst: &mut Frame,
    format: PixelFormat,
    bytes_per_pixel: u32,
) -> Result<(), ConvertError> {
    let need = (src.width * src.height * bytes_per_pixel) as usize;
    dst.resize_payload(need);
    dst.width = src.width;
    dst.height = src.height;
    dst.step = src.width * bytes_per_pixel;
    dst.format = format;
    dst.inherit_meta(src);
    Ok(())
}

pub fn yuyv_to_rgbx(src: &Frame, dst: &mut Frame) -> Result<(), ConvertError> {
    check_input(src, PixelFormat::Yuyv)?;
    prepare_dst(src, dst, PixelFormat::Rgbx, 4)?;
    for (yuyv, rgbx) in src
        .data()
        .chunks_exact(4)
        .zip(dst.data_mut().chunks_exact_mut(8))
    {
        let (r, g, b) = bt601_offsets(yuyv[1] as i32, yuyv[3] as i32);
        let y0 = yuyv[0] as i32;
        let y1 = yuyv[2] as i32;
        rgbx[0] = sat(y0 + r);
        rgbx[1] = sat(y0 + g);
        rgbx[2] = sat(y0 + b);
        rgbx[3] = 0xff;
        rgbx[4] = sat(y1 + r);
        rgbx[5] = sat(y1 + g);
        rgbx[6] = sat(y1 + b);
        rgbx[7] = 0xff;
    }
    Ok(())
}

pub fn yuyv_to_rgb(src: &Frame, dst: &mut Frame) -> Result<(), ConvertError> {
    check_input(src, PixelFormat::Yuyv)?;
    prepare_dst(src, dst, PixelFormat::Rgb, 3)?;
    for (yuyv, rgb) in src
        .data()
        .chunks_exact(4)
        .zip(dst.data_mut().chunks_exact_mut(6))
    {
        let (r, g, b) = bt601_offsets(yuyv[1] as i32, yuyv[3] as i32);
        let y0 = yuyv[0] as i32;
        let y1 = yuyv[2] as i32;
        rgb[0] = sat(y0 + r);
        rgb[1] = sat(y0 + g);
        rgb[2] = sat(y0 + b);
        rgb[3] = sat(y1 + r);
        rgb[4] = sat(y1 + g);
        rgb[5] = sat(y1 + b);
    }
    Ok(())
}

pub fn yuyv_to_bgr(src: &Frame, dst: &mut Frame) -> Result<(), ConvertError> {
    check_input(src, PixelFormat::Yuyv)?;
    prepare_dst(src, dst, PixelFormat::Bgr, 3)?;
    for (yuyv, bgr) in src
        .data()
        .chunks_exact(4)
        .zip(dst.data_mut().chunks_exact_mut(6))
    {
        let (r, g, b) = bt601_offsets(yuyv[1] as i32, yuyv[3] as i32);
        let y0 = yuyv[0] as i32;
        let y1 = yuyv[2] as i32;
        bgr[0] = sat(y0 + b);
        bgr[1] = sat(y0 + g);
        bgr[2] = sat(y0 + r);
        bgr[3] = sat(y1 + b);
        bgr[4] = sat(y1 + g);
        bgr[5] = sat(y1 + r);
    }
    Ok(())
}

#[inline]
fn pack565(r: u8, g: u8, b: u8) -> [u8; 2] {
    let v = ((r as u16 & 0xf8) << 8) | ((g as u16 & 0xfc) << 3) | (b as u16 >> 3);
    v.to_le_bytes()
}

pub fn yuyv_to_rgb565(src: &Frame, dst: &mut Frame) -> Result<(), ConvertError> {
    check_input(src, PixelFormat::Yuyv)?;
    prepare_dst(src, dst, OutputFormat::Rgb565.pixel_format(), 2)?;
    for (yuyv, out) in src
        .data()
        .chunks_exact(4)
        .zip(dst.data_mut().chunks_exact_mut(4))
    {
        let (r, g, b) = bt601_offsets(yuyv[1] as i32, yuyv[3] as i32);
        let y0 = yuyv[0] as i32;
        let y1 = yuyv[2] as i32;
        let p0 = pack565(sat(y0 + r), sat(y0 + g), sat(y0 + b));
        let p1 = pack565(sat(y1 + r), sat(y1 + g), sat(y1 + b));
        out[0] = p0[0];
        out[1] = p0[1];
        out[2] = p1[0];
        out[3] = p1[1];
    }
    Ok(())
}

pub fn yuyv_to_luma(src: &Frame, dst: &mut Frame) -> Result<(), ConvertError> {
    check_input(src, PixelFormat::Yuyv)?;
    prepare_dst(src, dst, PixelFormat::Gray8, 1)?;
    for (yuyv, py) in src
        .data()
        .chunks_exact(2)
        .zip(dst.data_mut().iter_mut())
    {
        *py = yuyv[0];
    }
    Ok(())
}

pub fn yuyv_to_chroma(src: &Frame, dst: &mut Frame) -> Result<(), ConvertError> {
    check_input(src, PixelFormat::Yuyv)?;
    prepare_dst(src, dst, PixelFormat::Gray8, 1)?;
    for (yuyv, puv) in src
        .data()
        .chunks_exact(2)
        .zip(dst.data_mut().iter_mut())
    {
        *puv = yuyv[1];
    }
    Ok(())
}

pub fn uyvy_to_rgbx(src: &Frame, dst: &mut Frame) -> Result<(), ConvertError> {
    check_input(src, PixelFormat::Uyvy)?;
    prepare_dst(src, dst, PixelFormat::Rgbx, 4)?;
    for (uyvy, rgbx) in src
        .data()
        .chunks_exact(4)
        .zip(dst.data_mut().chunks_exact_mut(8))
    {
        let (r, g, b) = bt601_offsets(uyvy[0] as i32, uyvy[2] as i32);
        let y0 = uyvy[1] as i32;
        let y1 = uyvy[3] as i32;
        rgbx[0] = sat(y0 + r);
        rgbx[1] = sat(y0 + g);
        rgbx[2] = sat(y0 + b);
        rgbx[3] = 0xff;
        rgbx[4] = sat(y1 + r);
        rgbx[5] = sat(y1 + g);
        rgbx[6] = sat(y1 + b);
        rgbx[7] = 0xff;
    }
    Ok(())
}

pub fn uyvy_to_rgb(src: &Frame, dst: &mut Frame) -> Result<(), ConvertError> {
    check_input(src, PixelFormat::Uyvy)?;
    prepare_dst(src, dst, PixelFormat::Rgb, 3)?;
    for (uyvy, rgb) in src
        .data()
        .chunks_exact(4)
        .zip(dst.data_mut().chunks_exact_mut(6))
    {
        let (r, g, b) = bt601_offsets(uyvy[0] as i32, uyvy[2] as i32);
        let y0 = uyvy[1] as i32;
        let y1 = uyvy[3] as i32;
        rgb[0] = sat(y0 + r);
        rgb[1] = sat(y0 + g);
        rgb[2] = sat(y0 + b);
        rgb[3] = sat(y1 + r);
        rgb[4] = sat(y1 + g);
        rgb[5] = sat(y1 + b);
    }
    Ok(())
}

pub fn uyvy_to_bgr(src: &Frame, dst: &mut Frame) -> Result<(), ConvertError> {
    check_input(src, PixelFormat::Uyvy)?;
    prepare_dst(src, dst, PixelFormat::Bgr, 3)?;
    for (uyvy, bgr) in src
        .data()
        .chunks_exact(4)
        .zip(dst.data_mut().chunks_exact_mut(6))
    {
        let (r, g, b) = bt601_offsets(uyvy[0] as i32, uyvy[2] as i32);
        let y0 = uyvy[1] as i32;
        let y1 = uyvy[3] as i32;
        bgr[0] = sat(y0 + b);
        bgr[1] = sat(y0 + g);
        bgr[2] = sat(y0 + r);
        bgr[3] = sat(y1 + b);
        bgr[4] = sat(y1 + g);
        bgr[5] = sat(y1 + r);
    }
    Ok(())
}

pub fn rgb_to_rgbx(src: &Frame, dst: &mut Frame) -> Result<(), ConvertError> {
    check_input(src, PixelFormat::Rgb)?;
    prepare_dst(src, dst, PixelFormat::Rgbx, 4)?;
    for (rgb, rgbx) in src
        .data()
        .chunks_exact(3)
        .zip(dst.data_mut().chunks_exact_mut(4))
    {
        rgbx[0] = rgb[0];
        rgbx[1] = rgb[1];
        rgbx[2] = rgb[2];
        rgbx[3] = 0xff;
    }
    Ok(())
}

/// Same-layout duplicate, preserving the color format.
pub fn copy_frame(src: &Frame, dst: &mut Frame) -> Result<(), ConvertError> {
    dst.resize_payload(src.len());
    dst.data_mut().copy_from_slice(src.data());
    dst.width = src.width;
    dst.height = src.height;
    dst.step = src.step;
    dst.format = src.format;
    dst.inherit_meta(src);
    Ok(())
}

fn decode_mjpeg(src: &Frame) -> Result<Vec<u8>, ConvertError> {
    let mut decoder = zune_jpeg::JpegDecoder::new(src.data());
    decoder
        .decode()
        .map_err(|e| ConvertError::Decode(e.to_string()))
}

pub fn mjpeg_to_rgb(src: &Frame, dst: &mut Frame) -> Result<(), ConvertError> {
    check_input(src, PixelFormat::Mjpeg)?;
    let pixels = decode_mjpeg(src)?;
    prepare_dst(src, dst, PixelFormat::Rgb, 3)?;
    let n = dst.len().min(pixels.len());
    dst.data_mut()[..n].copy_from_slice(&pixels[..n]);
    Ok(())
}

pub fn mjpeg_to_rgbx(src: &Frame, dst: &mut Frame) -> Result<(), ConvertError> {
    check_input(src, PixelFormat::Mjpeg)?;
    let pixels = decode_mjpeg(src)?;
    prepare_dst(src, dst, PixelFormat::Rgbx, 4)?;
    for (rgb, rgbx) in pixels
        .chunks_exact(3)
        .zip(dst.data_mut().chunks_exact_mut(4))
    {
        rgbx[0] = rgb[0];
        rgbx[1] = rgb[1];
        rgbx[2] = rgb[2];
        rgbx[3] = 0xff;
    }
    Ok(())
}

pub fn mjpeg_to_rgb565(src: &Frame, dst: &mut Frame) -> Result<(), ConvertError> {
    check_input(src, PixelFormat::Mjpeg)?;
    let pixels = decode_mjpeg(src)?;
    prepare_dst(src, dst, OutputFormat::Rgb565.pixel_format(), 2)?;
    for (rgb, out) in pixels
        .chunks_exact(3)
        .zip(dst.data_mut().chunks_exact_mut(2))
    {
        let p = pack565(rgb[0], rgb[1], rgb[2]);
        out[0] = p[0];
        out[1] = p[1];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_yuyv(width: u32, height: u32, y: u8, u: u8, v: u8) -> Frame {
        let data: Vec<u8> = [y, u, y, v]
            .iter()
            .copied()
            .cycle()
            .take((width * height * 2) as usize)
            .collect();
        Frame::new(width, height, PixelFormat::Yuyv, data)
    }

    fn dst_frame(bytes: usize) -> Frame {
        Frame::with_capacity(bytes).unwrap()
    }

    #[test]
    fn white_yuyv_converts_to_white_rgbx() {
        let src = solid_yuyv(8, 4, 255, 128, 128);
        let mut dst = dst_frame(8 * 4 * 4);
        yuyv_to_rgbx(&src, &mut dst).unwrap();
        assert_eq!(dst.format, PixelFormat::Rgbx);
        assert_eq!(dst.len(), 8 * 4 * 4);
        for px in dst.data().chunks_exact(4) {
            assert_eq!(px, &[255, 255, 255, 255]);
        }
    }

    #[test]
    fn mid_gray_round_trips_within_tolerance() {
        let src = solid_yuyv(8, 4, 128, 128, 128);
        let mut dst = dst_frame(8 * 4 * 4);
        yuyv_to_rgbx(&src, &mut dst).unwrap();
        for px in dst.data().chunks_exact(4) {
            for c in &px[..3] {
                assert!((*c as i32 - 128).abs() <= 2);
            }
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn chroma_offsets_match_reference_coefficients() {
        // Y=128, U=128, V=255: R = 128 + (22987*127 >> 14)
        let src = solid_yuyv(2, 2, 128, 128, 255);
        let mut dst = dst_frame(2 * 2 * 4);
        yuyv_to_rgbx(&src, &mut dst).unwrap();
        let expected_r = sat(128 + ((22987 * 127) >> 14));
        assert_eq!(dst.data()[0], expected_r);
    }

    #[test]
    fn luma_and_chroma_planes_extract() {
        let data = vec![10, 20, 30, 40, 50, 60, 70, 80];
        let src = Frame::new(2, 2, PixelFormat::Yuyv, data);
        let mut dst = dst_frame(4);
        yuyv_to_luma(&src, &mut dst).unwrap();
        assert_eq!(dst.data(), &[10, 30, 50, 70]);
        yuyv_to_chroma(&src, &mut dst).unwrap();
        assert_eq!(dst.data(), &[20, 40, 60, 80]);
    }

    #[test]
    fn white_packs_to_full_rgb565() {
        let src = solid_yuyv(4, 2, 255, 128, 128);
        let mut dst = dst_frame(4 * 2 * 2);
        yuyv_to_rgb565(&src, &mut dst).unwrap();
        for px in dst.data().chunks_exact(2) {
            assert_eq!(u16::from_le_bytes([px[0], px[1]]), 0xffff);
        }
    }

    #[test]
    fn uyvy_white_converts_like_yuyv() {
        let data: Vec<u8> = [128u8, 255, 128, 255]
            .iter()
            .copied()
            .cycle()
            .take(4 * 2 * 2)
            .collect();
        let src = Frame::new(4, 2, PixelFormat::Uyvy, data);
        let mut dst = dst_frame(4 * 2 * 4);
        uyvy_to_rgbx(&src, &mut dst).unwrap();
        for px in dst.data().chunks_exact(4) {
            assert_eq!(px, &[255, 255, 255, 255]);
        }
    }

    #[test]
    fn rgb_gains_opaque_padding_byte() {
        let src = Frame::new(2, 1, PixelFormat::Rgb, vec![1, 2, 3, 4, 5, 6]);
        let mut dst = dst_frame(8);
        rgb_to_rgbx(&src, &mut dst).unwrap();
        assert_eq!(dst.data(), &[1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn padded_source_cannot_overrun_destination() {
        // payload longer than width*height*2 (trailing padding)
        let mut data = vec![128u8; 4 * 2 * 2];
        data.extend_from_slice(&[0xaa; 32]);
        let mut src = Frame::new(4, 2, PixelFormat::Yuyv, data);
        src.step = 4 * 2 + 16; // stride wider than logical width
        let mut dst = dst_frame(4 * 2 * 4);
        yuyv_to_rgbx(&src, &mut dst).unwrap();
        assert_eq!(dst.len(), 4 * 2 * 4);
    }

    #[test]
    fn unsupported_pairs_resolve_to_none_once() {
        let mut dispatcher = Dispatcher::new();
        assert!(dispatcher
            .resolve(PixelFormat::Gray8, OutputFormat::Rgb565)
            .is_none());
        // memoized: same answer, no re-walk
        assert!(dispatcher
            .resolve(PixelFormat::Gray8, OutputFormat::Rgb565)
            .is_none());
        // a supported pair afterwards resets the binding
        assert!(dispatcher
            .resolve(PixelFormat::Yuyv, OutputFormat::Rgbx)
            .is_some());
    }

    #[test]
    fn table_distinguishes_source_and_destination_tags() {
        // source and destination enums share the Rgbx/Rgb565 names; the
        // table must route each pair to the right routine
        assert_eq!(
            select(PixelFormat::Yuyv, OutputFormat::Rgbx),
            Some(yuyv_to_rgbx as ConvertFn)
        );
        assert_eq!(
            select(PixelFormat::Yuyv, OutputFormat::Rgb565),
            Some(yuyv_to_rgb565 as ConvertFn)
        );
        assert_eq!(
            select(PixelFormat::Mjpeg, OutputFormat::Rgb565),
            Some(mjpeg_to_rgb565 as ConvertFn)
        );
        assert_eq!(
            select(PixelFormat::Rgbx, OutputFormat::Rgba),
            Some(copy_frame as ConvertFn)
        );
        assert!(select(PixelFormat::Rgb565, OutputFormat::Rgbx).is_none());
        assert!(select(PixelFormat::Gray8, OutputFormat::Chroma8).is_none());
    }

    #[test]
    fn wrong_input_format_is_rejected() {
        let src = Frame::new(2, 2, PixelFormat::Rgb, vec![0; 12]);
        let mut dst = dst_frame(16);
        assert!(matches!(
            yuyv_to_rgbx(&src, &mut dst),
            Err(ConvertError::BadInput { .. })
        ));
    }
}
