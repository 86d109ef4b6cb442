//! Image codec collaborator.
//!
//! Turns payload bytes into a [`PixelBuffer`] and back. Decoding accepts any
//! raster format the `image` crate recognises; encoding always produces PNG so
//! RGBA survives the round trip unchanged.

use crate::config::ImageConfig;
use crate::pixel::PixelBuffer;
use crate::{RelayError, Result};
use image::{ImageFormat, ImageReader, RgbaImage};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Decode/encode boundary used by sessions and the benchmark.
pub trait ImageCodec: Send + Sync + 'static {
    fn decode(&self, bytes: &[u8]) -> Result<PixelBuffer>;
    fn encode(&self, buffer: &PixelBuffer) -> Result<Vec<u8>>;
}

/// Lossless PNG codec with a decoded-pixel ceiling.
#[derive(Debug, Clone, Copy)]
pub struct PngCodec {
    max_pixels: u64,
}

impl Default for PngCodec {
    fn default() -> Self {
        Self {
            max_pixels: ImageConfig::MAX_DECODED_PIXELS,
        }
    }
}

impl PngCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pixels(max_pixels: u64) -> Self {
        Self { max_pixels }
    }

    /// Read width and height from the header without decoding pixel data.
    fn inspect_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| RelayError::Decode {
                message: format!("unrecognised image format: {}", e),
                source: None,
            })?;

        reader.into_dimensions().map_err(|e| RelayError::Decode {
            message: "cannot read image dimensions".to_string(),
            source: Some(e),
        })
    }

    fn check_pixel_limit(&self, width: u32, height: u32) -> Result<()> {
        let pixels = width as u64 * height as u64;
        if pixels > self.max_pixels {
            return Err(RelayError::ImageTooLarge {
                width,
                height,
                max_pixels: self.max_pixels,
            });
        }
        Ok(())
    }
}

impl ImageCodec for PngCodec {
    fn decode(&self, bytes: &[u8]) -> Result<PixelBuffer> {
        let (width, height) = Self::inspect_dimensions(bytes)?;
        self.check_pixel_limit(width, height)?;

        let decoded = image::load_from_memory(bytes).map_err(|e| RelayError::Decode {
            message: "payload is not a valid image".to_string(),
            source: Some(e),
        })?;

        debug!("Decoded {}x{} image ({} bytes)", width, height, bytes.len());
        Ok(PixelBuffer::from(decoded.to_rgba8()))
    }

    fn encode(&self, buffer: &PixelBuffer) -> Result<Vec<u8>> {
        let img = RgbaImage::try_from(buffer.clone())?;
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, ImageFormat::Png)
            .map_err(|e| RelayError::Encode {
                message: "PNG encoding failed".to_string(),
                source: Some(e),
            })?;
        Ok(cursor.into_inner())
    }
}

/// Load and decode an image file.
pub fn load_image(codec: &dyn ImageCodec, path: impl AsRef<Path>) -> Result<PixelBuffer> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| RelayError::io_with_path(e, path))?;
    codec.decode(&bytes)
}

/// Encode a buffer and write it to `path`.
pub fn save_image(codec: &dyn ImageCodec, buffer: &PixelBuffer, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let bytes = codec.encode(buffer)?;
    std::fs::write(path, bytes).map_err(|e| RelayError::io_with_path(e, path))
}
