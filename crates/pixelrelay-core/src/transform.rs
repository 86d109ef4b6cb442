//! Pixel transforms: box blur and nearest-neighbor downscale.
//!
//! Both transforms read an immutable source buffer and fill a freshly
//! allocated output one row at a time through a [`WorkerPool`]. A row job
//! depends only on the source, never on another job's output, so the result
//! is bit-identical for any worker count and any row order.

use crate::config::ImageConfig;
use crate::pixel::{PixelBuffer, Rgba, CHANNELS};
use crate::pool::WorkerPool;
use crate::{RelayError, Result};
use std::fmt;

/// A transform and its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Average over the `(2r+1)²` neighborhood clipped to the image.
    Blur { radius: u32 },
    /// Nearest-neighbor resample to an exact target size.
    Downscale { width: u32, height: u32 },
}

impl Transform {
    /// Wire name of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Transform::Blur { .. } => "blur",
            Transform::Downscale { .. } => "downscale",
        }
    }

    /// Apply this transform to `source`.
    pub fn apply(&self, source: &PixelBuffer, pool: &WorkerPool) -> Result<PixelBuffer> {
        match *self {
            Transform::Blur { radius } => blur(source, radius, pool),
            Transform::Downscale { width, height } => downscale(source, width, height, pool),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Blur { radius } => write!(f, "blur {}", radius),
            Transform::Downscale { width, height } => write!(f, "downscale {} {}", width, height),
        }
    }
}

/// Box blur with a clipped neighborhood.
///
/// Each output pixel is the truncating per-channel mean of every in-bounds
/// pixel within `radius` of it, center included. Near the edges fewer samples
/// are averaged; nothing is padded or wrapped. `radius == 0` is the identity.
pub fn blur(source: &PixelBuffer, radius: u32, pool: &WorkerPool) -> Result<PixelBuffer> {
    if radius == 0 || source.is_empty() {
        return Ok(source.clone());
    }

    let (width, height) = source.dimensions();
    // Past the larger side every neighborhood already covers the whole image.
    let radius = radius.min(width.max(height));

    let mut out = vec![0u8; source.as_raw().len()];
    pool.fill_rows(&mut out, source.row_stride(), |y, row| {
        blur_row(source, radius, y as u32, row);
    })?;

    PixelBuffer::from_raw(width, height, out)
}

fn blur_row(source: &PixelBuffer, radius: u32, y: u32, row: &mut [u8]) {
    let (width, height) = source.dimensions();
    let y0 = y.saturating_sub(radius);
    let y1 = y.saturating_add(radius).min(height - 1);

    for x in 0..width {
        let x0 = x.saturating_sub(radius);
        let x1 = x.saturating_add(radius).min(width - 1);

        let mut sum = [0u64; CHANNELS];
        for ny in y0..=y1 {
            let Some(src_row) = source.row(ny) else {
                continue;
            };
            let start = x0 as usize * CHANNELS;
            let end = (x1 as usize + 1) * CHANNELS;
            for px in src_row[start..end].chunks_exact(CHANNELS) {
                for (acc, &c) in sum.iter_mut().zip(px) {
                    *acc += c as u64;
                }
            }
        }

        let count = (y1 - y0 + 1) as u64 * (x1 - x0 + 1) as u64;
        let offset = x as usize * CHANNELS;
        for (dst, acc) in row[offset..offset + CHANNELS].iter_mut().zip(sum) {
            *dst = (acc / count) as u8;
        }
    }
}

/// Nearest-neighbor resample to `target_width × target_height`.
///
/// Target pixel `(x, y)` takes source pixel
/// `(floor(x * srcW / targetW), floor(y * srcH / targetH))`. Zero or
/// oversized target dimensions are rejected before the output is allocated.
pub fn downscale(
    source: &PixelBuffer,
    target_width: u32,
    target_height: u32,
    pool: &WorkerPool,
) -> Result<PixelBuffer> {
    if target_width == 0 || target_height == 0 {
        return Err(RelayError::InvalidDimensions {
            width: target_width,
            height: target_height,
        });
    }
    check_target_size(target_width, target_height)?;
    if source.is_empty() {
        let (width, height) = source.dimensions();
        return Err(RelayError::EmptySource { width, height });
    }

    let (src_width, src_height) = source.dimensions();
    let stride = target_width as usize * CHANNELS;
    let mut out = vec![0u8; stride * target_height as usize];

    pool.fill_rows(&mut out, stride, |y, row| {
        let src_y = scale_coord(y as u32, src_height, target_height);
        for x in 0..target_width {
            let src_x = scale_coord(x, src_width, target_width);
            let px: Rgba = source.get(src_x, src_y).unwrap_or_default();
            let offset = x as usize * CHANNELS;
            row[offset..offset + CHANNELS].copy_from_slice(&px);
        }
    })?;

    PixelBuffer::from_raw(target_width, target_height, out)
}

/// Reject a downscale target above [`ImageConfig::MAX_TARGET_PIXELS`].
pub fn check_target_size(width: u32, height: u32) -> Result<()> {
    let pixels = u64::from(width) * u64::from(height);
    if pixels > ImageConfig::MAX_TARGET_PIXELS {
        return Err(RelayError::TargetTooLarge {
            width,
            height,
            max_pixels: ImageConfig::MAX_TARGET_PIXELS,
        });
    }
    Ok(())
}

#[inline]
fn scale_coord(target: u32, src_len: u32, target_len: u32) -> u32 {
    (target as u64 * src_len as u64 / target_len as u64) as u32
}
