//! Dense row-major RGBA pixel storage.

use crate::{RelayError, Result};
use image::RgbaImage;

/// Bytes per pixel (R, G, B, A).
pub const CHANNELS: usize = 4;

/// One RGBA sample.
pub type Rgba = [u8; CHANNELS];

/// An immutable 2-D grid of RGBA pixels.
///
/// Transforms never mutate a buffer they read from; they allocate a fresh
/// output buffer and fill it row by row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw row-major RGBA bytes.
    ///
    /// Fails if `data` is not exactly `width * height * 4` bytes long.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = byte_len(width, height).ok_or_else(|| {
            RelayError::invalid_parameter("dimensions", format!("{width}x{height} overflows"))
        })?;
        if data.len() != expected {
            return Err(RelayError::invalid_parameter(
                "data",
                format!(
                    "expected {} bytes for {}x{} RGBA, got {}",
                    expected,
                    width,
                    height,
                    data.len()
                ),
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A buffer where every pixel is `color`.
    pub fn filled(width: u32, height: u32, color: Rgba) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&color);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Build a buffer by evaluating `f(x, y)` for every coordinate.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> Rgba) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Length of one row in bytes.
    pub fn row_stride(&self) -> usize {
        self.width as usize * CHANNELS
    }

    /// The pixel at `(x, y)`, or `None` outside the buffer.
    pub fn get(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        let mut px = [0u8; CHANNELS];
        px.copy_from_slice(&self.data[offset..offset + CHANNELS]);
        Some(px)
    }

    /// Raw bytes of row `y`.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.row_stride();
        Some(&self.data[start..start + self.row_stride()])
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }
}

impl From<RgbaImage> for PixelBuffer {
    fn from(img: RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            data: img.into_raw(),
        }
    }
}

impl TryFrom<PixelBuffer> for RgbaImage {
    type Error = RelayError;

    fn try_from(buffer: PixelBuffer) -> Result<Self> {
        let (width, height) = buffer.dimensions();
        RgbaImage::from_raw(width, height, buffer.data).ok_or_else(|| RelayError::Encode {
            message: format!("pixel data does not fit {width}x{height} RGBA"),
            source: None,
        })
    }
}

fn byte_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(CHANNELS))
}
