//! Local color correction on top of the `image` crate.
//!
//! Each adjustment blends the image with a "degenerate" version of itself:
//! `out = degenerate + factor * (pixel - degenerate)`.
//!
//! | adjustment | degenerate image                              |
//! |------------|-----------------------------------------------|
//! | brightness | black                                         |
//! | contrast   | uniform gray at the mean luma                 |
//! | saturation | per-pixel grayscale                           |
//! | sharpness  | 3x3 smoothed copy (borders left untouched)    |
//!
//! They are applied in that order. Decoding, filtering and encoding run on the
//! blocking pool.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use tracing::debug;

use crate::domain::Adjustments;
use crate::ports::{EnhanceError, ImageEnhancer, corrected_path_for};

pub const DEFAULT_JPEG_QUALITY: u8 = 95;

#[derive(Debug, Clone, Copy)]
pub struct ImageCrateEnhancer {
    quality: u8,
}

impl ImageCrateEnhancer {
    pub fn new() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Default for ImageCrateEnhancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageEnhancer for ImageCrateEnhancer {
    async fn enhance(
        &self,
        source: &Path,
        adjustments: &Adjustments,
    ) -> Result<PathBuf, EnhanceError> {
        let source = source.to_path_buf();
        let adjustments = *adjustments;
        let quality = self.quality;

        tokio::task::spawn_blocking(move || enhance_file(&source, &adjustments, quality))
            .await
            .map_err(|e| EnhanceError::Worker(e.to_string()))?
    }
}

fn enhance_file(
    source: &Path,
    adjustments: &Adjustments,
    quality: u8,
) -> Result<PathBuf, EnhanceError> {
    if !source.is_file() {
        return Err(EnhanceError::NotFound(source.to_path_buf()));
    }

    let decoded = image::open(source).map_err(|e| EnhanceError::Decode {
        path: source.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut rgb = decoded.to_rgb8();

    apply_adjustments(&mut rgb, adjustments);

    let target = corrected_path_for(source);
    let encode_err = |reason: String| EnhanceError::Encode {
        path: target.clone(),
        reason,
    };

    let file = File::create(&target).map_err(|e| encode_err(e.to_string()))?;
    let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| encode_err(e.to_string()))?;

    debug!(
        source = %source.display(),
        target = %target.display(),
        width = rgb.width(),
        height = rgb.height(),
        "wrote color-corrected image"
    );
    Ok(target)
}

/// Apply all four adjustments in place. A factor of exactly 1.0 is a no-op.
pub fn apply_adjustments(img: &mut RgbImage, adjustments: &Adjustments) {
    if adjustments.brightness != 1.0 {
        brightness(img, adjustments.brightness);
    }
    if adjustments.contrast != 1.0 {
        contrast(img, adjustments.contrast);
    }
    if adjustments.saturation != 1.0 {
        saturation(img, adjustments.saturation);
    }
    if adjustments.sharpness != 1.0 {
        sharpness(img, adjustments.sharpness);
    }
}

fn luma(p: &[u8; 3]) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

fn blend(degenerate: f32, value: u8, factor: f32) -> u8 {
    (degenerate + factor * (value as f32 - degenerate))
        .round()
        .clamp(0.0, 255.0) as u8
}

fn brightness(img: &mut RgbImage, factor: f32) {
    for px in img.pixels_mut() {
        for c in px.0.iter_mut() {
            *c = blend(0.0, *c, factor);
        }
    }
}

fn contrast(img: &mut RgbImage, factor: f32) {
    let count = (img.width() as u64 * img.height() as u64).max(1);
    let total: f64 = img.pixels().map(|px| luma(&px.0) as f64).sum();
    let mean = (total / count as f64).round() as f32;

    for px in img.pixels_mut() {
        for c in px.0.iter_mut() {
            *c = blend(mean, *c, factor);
        }
    }
}

fn saturation(img: &mut RgbImage, factor: f32) {
    for px in img.pixels_mut() {
        let gray = luma(&px.0).round();
        for c in px.0.iter_mut() {
            *c = blend(gray, *c, factor);
        }
    }
}

fn sharpness(img: &mut RgbImage, factor: f32) {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return;
    }

    // smoothing kernel [1 1 1; 1 5 1; 1 1 1] / 13
    let original = img.clone();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut acc = [0.0f32; 3];
            for dy in 0..3 {
                for dx in 0..3 {
                    let weight = if dx == 1 && dy == 1 { 5.0 } else { 1.0 };
                    let p = original.get_pixel(x + dx - 1, y + dy - 1).0;
                    for (a, v) in acc.iter_mut().zip(p) {
                        *a += weight * v as f32;
                    }
                }
            }
            let center = original.get_pixel(x, y).0;
            let out = img.get_pixel_mut(x, y);
            for ch in 0..3 {
                let smoothed = (acc[ch] / 13.0).round();
                out.0[ch] = blend(smoothed, center[ch], factor);
            }
        }
    }
}
