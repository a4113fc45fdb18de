//! Letterbox compositor: scale a generated image onto a transparent
//! print-sized canvas without distorting it.
//!
//! Pure and deterministic. Any failure here is a contract violation by the
//! caller, never a condition to retry.

use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Print canvas dimensions the marketplace accepts for apparel uploads.
pub const PRINT_WIDTH: u32 = 4500;
pub const PRINT_HEIGHT: u32 = 5400;

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("source image has a zero dimension ({0}x{1})")]
    EmptySource(u32, u32),

    #[error("canvas spec has a zero dimension ({0}x{1})")]
    EmptyCanvas(u32, u32),

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Target canvas for composited output. Process-wide constant for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSpec {
    pub width: u32,
    pub height: u32,
    /// Alpha of the uncovered canvas region; 0 for print transparency.
    pub background_alpha: u8,
}

impl CanvasSpec {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            background_alpha: 0,
        }
    }

    pub fn print_default() -> Self {
        Self::new(PRINT_WIDTH, PRINT_HEIGHT)
    }
}

/// Decoded output of a single provider call.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub image: RgbaImage,
    /// Name of the provider that produced it.
    pub provider: String,
}

impl RawImage {
    pub fn new(image: RgbaImage, provider: impl Into<String>) -> Self {
        Self {
            image,
            provider: provider.into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A raw image letterboxed onto its canvas. Dimensions always equal the
/// spec exactly.
#[derive(Debug, Clone)]
pub struct CompositeImage {
    image: RgbaImage,
    spec: CanvasSpec,
}

impl CompositeImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn spec(&self) -> CanvasSpec {
        self.spec
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.image
    }

    /// Encoded bytes handed to the marketplace file input.
    pub fn encode_png(&self) -> Result<Vec<u8>, CompositeError> {
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf).write_image(
            self.image.as_raw(),
            self.image.width(),
            self.image.height(),
            ExtendedColorType::Rgba8,
        )?;
        Ok(buf)
    }
}

/// Resize `raw` to fit `spec` without distortion and paste it centered on a
/// transparent canvas, using the source's own alpha as the paste mask.
pub fn composite(raw: &RawImage, spec: CanvasSpec) -> Result<CompositeImage, CompositeError> {
    if raw.width() == 0 || raw.height() == 0 {
        return Err(CompositeError::EmptySource(raw.width(), raw.height()));
    }
    if spec.width == 0 || spec.height == 0 {
        return Err(CompositeError::EmptyCanvas(spec.width, spec.height));
    }

    let scale = f64::min(
        spec.width as f64 / raw.width() as f64,
        spec.height as f64 / raw.height() as f64,
    );
    let new_w = ((raw.width() as f64 * scale).round() as u32).max(1);
    let new_h = ((raw.height() as f64 * scale).round() as u32).max(1);

    // Print output is large; Lanczos keeps resampling artifacts down at
    // these magnifications.
    let resized = imageops::resize(&raw.image, new_w, new_h, FilterType::Lanczos3);

    let mut canvas = RgbaImage::from_pixel(
        spec.width,
        spec.height,
        Rgba([0, 0, 0, spec.background_alpha]),
    );
    let x = i64::from((spec.width - new_w) / 2);
    let y = i64::from((spec.height - new_h) / 2);
    imageops::overlay(&mut canvas, &resized, x, y);

    Ok(CompositeImage {
        image: canvas,
        spec,
    })
}
