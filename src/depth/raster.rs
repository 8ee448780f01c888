use std::io::Cursor;

use bytes::Bytes;
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};

use crate::error::{Error, Result};

/// Single-channel 16-bit raster produced by depth quantization
pub type DepthRaster = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Lossless raster compressor used to shrink quantized depth for transport.
///
/// Implementations must reproduce every sample exactly; the depth codec relies
/// on value 0 surviving as the "no measurement" sentinel.
pub trait RasterCodec: Send + Sync {
    fn compress(&self, raster: &DepthRaster) -> Result<Bytes>;

    fn decompress(&self, data: &[u8]) -> Result<DepthRaster>;
}

/// 16-bit grayscale PNG. Dimensions travel inside the PNG header, so the
/// payload is self-describing.
#[derive(Debug, Default, Clone, Copy)]
pub struct PngRasterCodec;

impl RasterCodec for PngRasterCodec {
    fn compress(&self, raster: &DepthRaster) -> Result<Bytes> {
        let mut out = Cursor::new(Vec::with_capacity(raster.as_raw().len()));
        // DynamicImage wants ownership; the raster is small (depth resolution)
        DynamicImage::ImageLuma16(raster.clone()).write_to(&mut out, ImageFormat::Png)?;
        Ok(Bytes::from(out.into_inner()))
    }

    fn decompress(&self, data: &[u8]) -> Result<DepthRaster> {
        match image::load_from_memory_with_format(data, ImageFormat::Png)? {
            DynamicImage::ImageLuma16(raster) => Ok(raster),
            other => Err(Error::Codec(format!(
                "depth payload is {:?}, expected 16-bit grayscale",
                other.color()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_is_lossless() {
        let raster = DepthRaster::from_fn(7, 5, |x, y| Luma([(x * 9000 + y * 311) as u16]));
        let codec = PngRasterCodec;
        let compressed = codec.compress(&raster).unwrap();
        let restored = codec.decompress(&compressed).unwrap();
        assert_eq!(restored.dimensions(), (7, 5));
        assert_eq!(restored.as_raw(), raster.as_raw());
    }

    #[test]
    fn test_rejects_eight_bit_png() {
        let gray = image::GrayImage::new(2, 2);
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(gray)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        assert!(PngRasterCodec.decompress(out.get_ref()).is_err());
    }

    #[test]
    fn test_garbage_is_codec_error() {
        let err = PngRasterCodec.decompress(b"not a png").unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }
}
