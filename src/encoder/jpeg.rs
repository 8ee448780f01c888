use async_trait::async_trait;
use bytes::Bytes;
use image::ExtendedColorType;
use image::codecs::jpeg;

use crate::assets::JPEG_QUALITY;
use crate::encoder::frame_pool::FramePool;
use crate::encoder::{EncodedAccessUnit, HardwareEncoder};
use crate::error::{Error, Result};
use crate::pipeline::types::{ColorFrame, PixelFormat};

/// Intra-only JPEG encoder running on the blocking pool
pub struct JpegEncoder {
    quality: u8,
    pool: FramePool,
}

impl JpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            pool: FramePool::new(0),
        }
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(JPEG_QUALITY)
    }
}

/// Repack a frame as tightly packed RGB into `out`
fn pack_rgb(frame: &ColorFrame, out: &mut Vec<u8>) {
    match frame.format {
        PixelFormat::Rgb24 => out.extend_from_slice(&frame.data),
        PixelFormat::Bgra32 => {
            for px in frame.data.chunks_exact(4) {
                out.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        }
        PixelFormat::Gray8 => {
            for v in frame.data.iter() {
                out.extend_from_slice(&[*v, *v, *v]);
            }
        }
    }
}

pub(crate) fn encode_rgb(rgb: &[u8], width: u32, height: u32, quality: u8) -> Result<Bytes> {
    let mut out = Vec::with_capacity(rgb.len() / 8);
    jpeg::JpegEncoder::new_with_quality(&mut out, quality).encode(
        rgb,
        width,
        height,
        ExtendedColorType::Rgb8,
    )?;
    Ok(Bytes::from(out))
}

#[async_trait]
impl HardwareEncoder for JpegEncoder {
    async fn encode(&mut self, frame: ColorFrame) -> Result<EncodedAccessUnit> {
        let mut rgb = self
            .pool
            .take(frame.width as usize * frame.height as usize * 3);
        let quality = self.quality;

        let (rgb, encoded) = tokio::task::spawn_blocking(move || {
            pack_rgb(&frame, &mut rgb);
            let encoded = encode_rgb(&rgb, frame.width, frame.height, quality);
            (rgb, encoded)
        })
        .await
        .map_err(|e| Error::Codec(format!("encoder task failed: {}", e)))?;

        self.pool.put(rgb);
        Ok(EncodedAccessUnit {
            data: encoded?,
            is_keyframe: true,
        })
    }

    fn name(&self) -> &'static str {
        "jpeg"
    }
}
