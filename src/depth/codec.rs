//! 16-bit transport encoding for depth maps
//!
//! `v16 = round((clamp(d) - min) / (max - min) * 65535)`, with 0 reserved for
//! pixels without a measurement. A valid depth that would quantize to 0 (the
//! range minimum) is stored as 1 so it can never be mistaken for the sentinel;
//! the error stays within one quantization step.

use std::sync::Arc;

use bytes::Bytes;
use image::Luma;

use super::raster::{DepthRaster, PngRasterCodec, RasterCodec};
use super::{DepthFrame, DepthRange, INVALID_DEPTH};
use crate::error::Result;

/// Sentinel for "no measurement" in the quantized raster
pub const NO_DEPTH: u16 = 0;

#[inline]
pub fn quantize(depth: f32, range: &DepthRange) -> u16 {
    match range.normalize(depth) {
        None => NO_DEPTH,
        Some(norm) => ((norm * u16::MAX as f64).round() as u16).max(1),
    }
}

#[inline]
pub fn dequantize(value: u16, range: &DepthRange) -> f32 {
    if value == NO_DEPTH {
        return INVALID_DEPTH;
    }
    let norm = value as f64 / u16::MAX as f64;
    (range.min_depth as f64 + norm * range.span() as f64) as f32
}

pub fn quantize_frame(frame: &DepthFrame, range: &DepthRange) -> DepthRaster {
    let samples = frame.data.iter().map(|d| quantize(*d, range)).collect();
    // length matches width * height by DepthFrame construction
    DepthRaster::from_raw(frame.width, frame.height, samples)
        .unwrap_or_else(|| DepthRaster::from_pixel(frame.width, frame.height, Luma([NO_DEPTH])))
}

pub fn dequantize_raster(raster: &DepthRaster, range: &DepthRange) -> DepthFrame {
    let (width, height) = raster.dimensions();
    DepthFrame {
        width,
        height,
        data: raster.as_raw().iter().map(|v| dequantize(*v, range)).collect(),
    }
}

/// Transport codec: quantization followed by lossless raster compression.
#[derive(Clone)]
pub struct DepthCodec {
    range: DepthRange,
    raster: Arc<dyn RasterCodec>,
}

impl DepthCodec {
    pub fn new(range: DepthRange) -> Self {
        Self::with_raster_codec(range, Arc::new(PngRasterCodec))
    }

    pub fn with_raster_codec(range: DepthRange, raster: Arc<dyn RasterCodec>) -> Self {
        Self { range, raster }
    }

    pub fn range(&self) -> &DepthRange {
        &self.range
    }

    pub fn encode_depth(&self, frame: &DepthFrame) -> Result<Bytes> {
        let raster = quantize_frame(frame, &self.range);
        self.raster.compress(&raster)
    }

    pub fn decode_depth(&self, data: &[u8]) -> Result<DepthFrame> {
        let raster = self.raster.decompress(data)?;
        Ok(dequantize_raster(&raster, &self.range))
    }
}

impl std::fmt::Debug for DepthCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthCodec")
            .field("range", &self.range)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::is_valid_depth;

    #[test]
    fn test_uniform_frame_quantizes_to_midpoint() {
        let range = DepthRange::default();
        let frame = DepthFrame::filled(8, 6, 2.75);

        let raster = quantize_frame(&frame, &range);
        assert!(raster.pixels().all(|p| p.0[0] == 32768));

        let codec = DepthCodec::new(range);
        let decoded = codec.decode_depth(&codec.encode_depth(&frame).unwrap()).unwrap();
        assert_eq!((decoded.width, decoded.height), (8, 6));
        for d in &decoded.data {
            assert!((d - 2.75).abs() <= range.quantization_step());
        }
    }

    #[test]
    fn test_round_trip_within_one_step() {
        let range = DepthRange::default();
        let step = range.quantization_step();
        let samples = 10_000;
        for i in 0..=samples {
            let d = range.min_depth + range.span() * i as f32 / samples as f32;
            let back = dequantize(quantize(d, &range), &range);
            assert!(
                (back - d).abs() <= step + 1e-6,
                "depth {} came back as {} (step {})",
                d,
                back,
                step
            );
        }
    }

    #[test]
    fn test_invalid_depth_stays_invalid() {
        let range = DepthRange::default();
        for d in [0.0f32, -0.0, -3.0, f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            assert_eq!(quantize(d, &range), NO_DEPTH);
            assert!(!is_valid_depth(dequantize(quantize(d, &range), &range)));
        }
    }

    #[test]
    fn test_range_minimum_does_not_collide_with_sentinel() {
        let range = DepthRange::default();
        assert_eq!(quantize(range.min_depth, &range), 1);
        assert_eq!(quantize(0.1, &range), 1);
        let back = dequantize(1, &range);
        assert!(is_valid_depth(back));
        assert!((back - range.min_depth).abs() <= range.quantization_step() + 1e-6);
    }

    #[test]
    fn test_out_of_range_clamps() {
        let range = DepthRange::default();
        assert_eq!(quantize(12.0, &range), u16::MAX);
        assert_eq!(dequantize(u16::MAX, &range), range.max_depth);
    }

    #[test]
    fn test_frame_with_holes_survives_transport() {
        let codec = DepthCodec::new(DepthRange::new(0.2, 8.0).unwrap());
        let frame = DepthFrame::new(3, 2, vec![1.0, 0.0, f32::NAN, 7.9, -1.0, 0.2]).unwrap();
        let decoded = codec.decode_depth(&codec.encode_depth(&frame).unwrap()).unwrap();

        assert_eq!(decoded.valid_count(), 3);
        assert!(decoded.depth_at(1, 0).is_none());
        assert!(decoded.depth_at(2, 0).is_none());
        assert!(decoded.depth_at(1, 1).is_none());
        let step = codec.range().quantization_step();
        assert!((decoded.depth_at(0, 0).unwrap() - 1.0).abs() <= step);
        assert!((decoded.depth_at(0, 1).unwrap() - 7.9).abs() <= step);
    }
}
