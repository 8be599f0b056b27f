use crate::capture::RawFrame;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};
use thiserror::Error;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Quality used when none is configured
pub const DEFAULT_JPEG_QUALITY: u8 = 100;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Frame is {actual} bytes, expected {expected} for {width}x{height} RGB")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Compresses RGB24 frames to JPEG at a fixed quality
#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
    quality: u8,
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl JpegEncoder {
    /// `quality` is clamped to 1..=100
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode(&self, frame: &RawFrame) -> Result<Vec<u8>, EncodeError> {
        let expected = frame.step() * frame.height as usize;
        if frame.data.len() != expected || expected == 0 {
            return Err(EncodeError::SizeMismatch {
                width: frame.width,
                height: frame.height,
                expected,
                actual: frame.data.len(),
            });
        }

        let mut buffer = Vec::new();
        ImageJpegEncoder::new_with_quality(&mut buffer, self.quality).write_image(
            &frame.data,
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(buffer)
    }
}

/// Decode a JPEG payload back to RGB24
pub fn decode_jpeg(bytes: &[u8]) -> Result<RawFrame, EncodeError> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?.to_rgb8();
    Ok(RawFrame {
        width: image.width(),
        height: image.height(),
        data: image.into_raw(),
    })
}
