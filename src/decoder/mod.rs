//! Color stream decoding
//!
//! A decoder session is stateful: it is seeded by a keyframe and may be torn
//! down and rebuilt through its factory when the stream becomes undecodable.

pub mod jpeg;

use crate::error::Result;
use crate::pipeline::types::ColorFrame;

pub use jpeg::{JpegDecoder, JpegDecoderFactory};

/// Streaming color decoder session
pub trait ColorDecoder: Send {
    /// Decode one access unit. `Ok(None)` means the session is still
    /// buffering and produced no picture for this unit.
    fn decode(&mut self, data: &[u8], is_keyframe: bool) -> Result<Option<ColorFrame>>;

    fn name(&self) -> &'static str;
}

/// Builds fresh decoder sessions. Failing to build one is fatal for the
/// receiving stream.
pub trait ColorDecoderFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn ColorDecoder>>;
}

impl<F> ColorDecoderFactory for F
where
    F: Fn() -> Result<Box<dyn ColorDecoder>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn ColorDecoder>> {
        self()
    }
}
