//! Depth maps and their encodings
//!
//! Two encodings share one calibration range and clamp policy:
//! - transport: 16-bit linear quantization wrapped in a lossless raster codec
//! - visualization: 8-bit inverted grayscale, used only for local preview and
//!   recording, never sent on the wire

pub mod codec;
pub mod raster;
pub mod visual;

use serde::{Deserialize, Serialize};

use crate::assets::{DEFAULT_MAX_DEPTH, DEFAULT_MIN_DEPTH};
use crate::error::{Error, Result};

pub use codec::DepthCodec;
pub use raster::{DepthRaster, PngRasterCodec, RasterCodec};
pub use visual::DepthVisualizer;

/// Marker stored for pixels without a measurement after decoding.
pub const INVALID_DEPTH: f32 = f32::NAN;

/// A sensor measurement is usable only when finite and strictly positive.
#[inline]
pub fn is_valid_depth(depth: f32) -> bool {
    depth.is_finite() && depth > 0.0
}

/// Low-resolution grid of depth values in meters, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl DepthFrame {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        if data.len() != width as usize * height as usize {
            return Err(Error::Codec(format!(
                "depth frame {}x{} needs {} samples, got {}",
                width,
                height,
                width as usize * height as usize,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: u32, height: u32, depth: f32) -> Self {
        Self {
            width,
            height,
            data: vec![depth; width as usize * height as usize],
        }
    }

    /// Depth at a pixel, `None` when the pixel carries no measurement
    pub fn depth_at(&self, x: u32, y: u32) -> Option<f32> {
        let d = *self.data.get(y as usize * self.width as usize + x as usize)?;
        is_valid_depth(d).then_some(d)
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|d| is_valid_depth(**d)).count()
    }
}

/// Calibration range shared by both depth encodings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthRange {
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for DepthRange {
    fn default() -> Self {
        Self {
            min_depth: DEFAULT_MIN_DEPTH,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl DepthRange {
    pub fn new(min_depth: f32, max_depth: f32) -> Result<Self> {
        let range = Self {
            min_depth,
            max_depth,
        };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min_depth.is_finite() || !self.max_depth.is_finite() {
            return Err(Error::Configuration(format!(
                "depth range must be finite, got [{}, {}]",
                self.min_depth, self.max_depth
            )));
        }
        if self.min_depth < 0.0 || self.min_depth >= self.max_depth {
            return Err(Error::Configuration(format!(
                "depth range requires 0 <= min < max, got [{}, {}]",
                self.min_depth, self.max_depth
            )));
        }
        Ok(())
    }

    pub fn span(&self) -> f32 {
        self.max_depth - self.min_depth
    }

    /// Position of a valid depth inside the range, clamped to [0, 1].
    /// Invalid depths have no position.
    pub fn normalize(&self, depth: f32) -> Option<f64> {
        if !is_valid_depth(depth) {
            return None;
        }
        let clamped = depth.clamp(self.min_depth, self.max_depth) as f64;
        Some((clamped - self.min_depth as f64) / self.span() as f64)
    }

    /// Smallest depth difference the 16-bit transport encoding can represent
    pub fn quantization_step(&self) -> f32 {
        self.span() / u16::MAX as f32
    }
}
