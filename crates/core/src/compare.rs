//! Pixel comparison of baseline and current images

use std::io::Cursor;

use image::{ImageFormat, Pixel, Rgba, RgbaImage};
use tracing::debug;

use shotcheck_common::Rect;

use crate::error::ComparisonError;

/// Outcome of comparing two images
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Pixels outside masked regions that differ
    pub diff_pixel_count: u64,

    /// Pixels compared, masked ones included
    pub total_pixels: u64,

    /// PNG highlighting differing pixels, present iff `diff_pixel_count > 0`
    pub diff_image: Option<Vec<u8>>,
}

impl Comparison {
    pub fn identical(total_pixels: u64) -> Self {
        Self {
            diff_pixel_count: 0,
            total_pixels,
            diff_image: None,
        }
    }
}

/// Compares two encoded images. Must be pure and thread-safe.
pub trait ComparisonEngine: Send + Sync {
    fn compare(
        &self,
        baseline: &[u8],
        current: &[u8],
        masks: &[Rect],
    ) -> Result<Comparison, ComparisonError>;
}

/// Per-channel comparator drawing differences red on a dimmed copy
#[derive(Debug, Clone)]
pub struct PixelComparator {
    /// Largest per-channel delta still counted as equal
    tolerance: u8,
}

impl PixelComparator {
    pub fn new(tolerance: u8) -> Self {
        Self { tolerance }
    }

    /// Exact comparison
    pub fn strict() -> Self {
        Self::new(0)
    }

    fn pixels_differ(&self, a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
        a.channels()
            .iter()
            .zip(b.channels())
            .any(|(x, y)| x.abs_diff(*y) > self.tolerance)
    }

    fn decode(bytes: &[u8], which: &'static str) -> Result<RgbaImage, ComparisonError> {
        image::load_from_memory(bytes)
            .map(|img| img.to_rgba8())
            .map_err(|e| ComparisonError::Decode {
                which,
                reason: e.to_string(),
            })
    }
}

impl Default for PixelComparator {
    fn default() -> Self {
        // absorbs anti-aliasing noise
        Self::new(5)
    }
}

impl ComparisonEngine for PixelComparator {
    fn compare(
        &self,
        baseline: &[u8],
        current: &[u8],
        masks: &[Rect],
    ) -> Result<Comparison, ComparisonError> {
        let current_img = Self::decode(current, "current")?;
        let (width, height) = current_img.dimensions();
        let total_pixels = width as u64 * height as u64;

        if baseline == current {
            debug!("Images are byte-identical");
            return Ok(Comparison::identical(total_pixels));
        }

        let baseline_img = Self::decode(baseline, "baseline")?;
        if baseline_img.dimensions() != current_img.dimensions() {
            return Err(ComparisonError::DimensionMismatch {
                baseline: baseline_img.dimensions(),
                current: current_img.dimensions(),
            });
        }

        let mut diff_img = RgbaImage::new(width, height);
        let mut diff_pixels = 0u64;

        for (x, y, current_pixel) in current_img.enumerate_pixels() {
            let baseline_pixel = baseline_img.get_pixel(x, y);
            let masked = masks.iter().any(|r| r.contains(x, y));

            if !masked && self.pixels_differ(current_pixel, baseline_pixel) {
                diff_pixels += 1;
                diff_img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            } else {
                let c = current_pixel.channels();
                diff_img.put_pixel(x, y, Rgba([c[0] / 2, c[1] / 2, c[2] / 2, 128]));
            }
        }

        if diff_pixels == 0 {
            return Ok(Comparison::identical(total_pixels));
        }

        let mut encoded = Cursor::new(Vec::new());
        diff_img
            .write_to(&mut encoded, ImageFormat::Png)
            .map_err(|e| ComparisonError::Encode(e.to_string()))?;

        Ok(Comparison {
            diff_pixel_count: diff_pixels,
            total_pixels,
            diff_image: Some(encoded.into_inner()),
        })
    }
}
