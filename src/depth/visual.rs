//! 8-bit inverted grayscale rendering for preview and local recording
//!
//! Near is bright, far is dark, holes are black:
//! `v8 = round((1 - normalized) * 255)`, invalid → 0.
//! This encoding is lossy and never leaves the device.

use super::{DepthFrame, DepthRange};

#[inline]
pub fn visualize(depth: f32, range: &DepthRange) -> u8 {
    match range.normalize(depth) {
        None => 0,
        Some(norm) => ((1.0 - norm) * 255.0).round() as u8,
    }
}

/// Converts depth frames at capture rate into one reused 8-bit buffer.
///
/// The buffer is only reallocated when the depth resolution changes.
pub struct DepthVisualizer {
    range: DepthRange,
    buffer: Vec<u8>,
}

impl DepthVisualizer {
    pub fn new(range: DepthRange) -> Self {
        Self {
            range,
            buffer: Vec::new(),
        }
    }

    /// Render `frame` and return the 8-bit plane (row-major, one byte per pixel)
    pub fn render(&mut self, frame: &DepthFrame) -> &[u8] {
        let len = frame.data.len();
        if self.buffer.len() != len {
            self.buffer.resize(len, 0);
        }

        for (dst, depth) in self.buffer.iter_mut().zip(&frame.data) {
            *dst = visualize(*depth, &self.range);
        }
        &self.buffer
    }

    #[cfg(test)]
    fn buffer_ptr(&self) -> *const u8 {
        self.buffer.as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::INVALID_DEPTH;

    #[test]
    fn test_visualization_mapping() {
        let range = DepthRange::default();
        assert_eq!(visualize(0.5, &range), 255);
        assert_eq!(visualize(0.2, &range), 255);
        assert_eq!(visualize(5.0, &range), 0);
        assert_eq!(visualize(2.75, &range), 128);
        assert_eq!(visualize(0.0, &range), 0);
        assert_eq!(visualize(INVALID_DEPTH, &range), 0);
    }

    #[test]
    fn test_buffer_reused_across_frames() {
        let mut vis = DepthVisualizer::new(DepthRange::default());
        let first = DepthFrame::filled(16, 12, 1.0);
        let second = DepthFrame::filled(16, 12, 4.0);

        vis.render(&first);
        let ptr = vis.buffer_ptr();
        let plane = vis.render(&second).to_vec();
        assert_eq!(vis.buffer_ptr(), ptr);
        assert_eq!(plane.len(), 16 * 12);
        assert!(plane.iter().all(|v| *v == visualize(4.0, &DepthRange::default())));
    }
}
