use image::ImageFormat;

use crate::decoder::{ColorDecoder, ColorDecoderFactory};
use crate::error::Result;
use crate::pipeline::types::ColorFrame;

/// Decoder for intra-only JPEG color units
#[derive(Debug, Default)]
pub struct JpegDecoder {
    decoded: u64,
}

impl JpegDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decoded(&self) -> u64 {
        self.decoded
    }
}

impl ColorDecoder for JpegDecoder {
    fn decode(&mut self, data: &[u8], _is_keyframe: bool) -> Result<Option<ColorFrame>> {
        let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
        self.decoded += 1;
        Ok(Some(ColorFrame::from_rgb(image.to_rgb8())))
    }

    fn name(&self) -> &'static str {
        "jpeg"
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JpegDecoderFactory;

impl ColorDecoderFactory for JpegDecoderFactory {
    fn create(&self) -> Result<Box<dyn ColorDecoder>> {
        Ok(Box::new(JpegDecoder::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::jpeg::encode_rgb;
    use crate::error::Error;

    #[test]
    fn test_decodes_encoded_unit() {
        let rgb = vec![120u8; 16 * 8 * 3];
        let data = encode_rgb(&rgb, 16, 8, 90).unwrap();
        let mut decoder = JpegDecoderFactory.create().unwrap();
        let frame = decoder.decode(&data, true).unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (16, 8));
        let i = (3 * 16 + 3) * 3;
        assert!(frame.data[i..i + 3].iter().all(|c| (*c as i32 - 120).abs() <= 3));
    }

    #[test]
    fn test_corrupt_unit_is_codec_error() {
        let mut decoder = JpegDecoder::new();
        let err = decoder.decode(&[0xFF, 0xD8, 0x00, 0x01], false).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
        assert_eq!(decoder.decoded(), 0);
    }
}
