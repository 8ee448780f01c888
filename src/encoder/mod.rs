//! Color stream encoding
//!
//! Accelerated encoders are platform collaborators; the pipeline only sees the
//! `HardwareEncoder` capability. `JpegEncoder` is the portable reference
//! implementation where every unit is a keyframe.

pub(crate) mod frame_pool;
pub mod jpeg;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::pipeline::types::ColorFrame;

pub use jpeg::JpegEncoder;

/// One encoded color access unit
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAccessUnit {
    pub data: Bytes,
    pub is_keyframe: bool,
}

/// Asynchronous color encoder.
///
/// The encoder takes ownership of each frame until the encode completes.
/// A failed encode loses only that frame.
#[async_trait]
pub trait HardwareEncoder: Send {
    async fn encode(&mut self, frame: ColorFrame) -> Result<EncodedAccessUnit>;

    fn name(&self) -> &'static str;
}
