//! Image enhancement strategies applied before recognition.
//!
//! Each strategy is a pure transform producing a new image; the input
//! raster is never mutated. Strategy selection is caller-driven: the
//! selector applies every requested strategy and returns all variants so
//! the orchestrator can pick the best result by post-hoc confidence
//! comparison.

use std::str::FromStr;

use image::imageops;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::adaptive_threshold;
use imageproc::filter::median_filter;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};

use crate::recognition::error::RecognitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnhancementStrategy {
    /// Identity pass-through.
    Original,
    Grayscale,
    AdaptiveThreshold,
    ContrastStretch,
    Sharpen,
    Denoise,
    Binarization,
    Deskew,
}

impl EnhancementStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnhancementStrategy::Original => "original",
            EnhancementStrategy::Grayscale => "grayscale",
            EnhancementStrategy::AdaptiveThreshold => "adaptive_threshold",
            EnhancementStrategy::ContrastStretch => "contrast_stretch",
            EnhancementStrategy::Sharpen => "sharpen",
            EnhancementStrategy::Denoise => "denoise",
            EnhancementStrategy::Binarization => "binarization",
            EnhancementStrategy::Deskew => "deskew",
        }
    }

    pub fn all() -> &'static [EnhancementStrategy] {
        &[
            EnhancementStrategy::Original,
            EnhancementStrategy::Grayscale,
            EnhancementStrategy::AdaptiveThreshold,
            EnhancementStrategy::ContrastStretch,
            EnhancementStrategy::Sharpen,
            EnhancementStrategy::Denoise,
            EnhancementStrategy::Binarization,
            EnhancementStrategy::Deskew,
        ]
    }
}

impl std::fmt::Display for EnhancementStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EnhancementStrategy {
    type Err = RecognitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "original" => Ok(EnhancementStrategy::Original),
            "grayscale" => Ok(EnhancementStrategy::Grayscale),
            "adaptive_threshold" => Ok(EnhancementStrategy::AdaptiveThreshold),
            "contrast_stretch" => Ok(EnhancementStrategy::ContrastStretch),
            "sharpen" => Ok(EnhancementStrategy::Sharpen),
            "denoise" => Ok(EnhancementStrategy::Denoise),
            "binarization" => Ok(EnhancementStrategy::Binarization),
            "deskew" => Ok(EnhancementStrategy::Deskew),
            other => Err(RecognitionError::Configuration {
                details: format!(
                    "unsupported enhancement strategy '{}'. Supported: {}",
                    other,
                    EnhancementStrategy::all()
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }),
        }
    }
}

/// One processed variant of a page raster, tagged with its strategy.
#[derive(Debug, Clone)]
pub struct EnhancedImage {
    pub strategy: EnhancementStrategy,
    pub image: DynamicImage,
}

/// Apply every requested strategy to the raster, returning one variant per
/// strategy in request order.
pub fn enhance(image: &DynamicImage, strategies: &[EnhancementStrategy]) -> Vec<EnhancedImage> {
    strategies
        .iter()
        .map(|&strategy| EnhancedImage {
            strategy,
            image: apply(image, strategy),
        })
        .collect()
}

/// Apply a single strategy, producing a new image buffer.
pub fn apply(image: &DynamicImage, strategy: EnhancementStrategy) -> DynamicImage {
    match strategy {
        EnhancementStrategy::Original => image.clone(),
        EnhancementStrategy::Grayscale => DynamicImage::ImageLuma8(image.to_luma8()),
        EnhancementStrategy::AdaptiveThreshold => {
            let gray = image.to_luma8();
            // Block radius chosen to cover roughly one text line at 200-300
            // DPI scans.
            DynamicImage::ImageLuma8(adaptive_threshold(&gray, 12))
        }
        EnhancementStrategy::ContrastStretch => {
            DynamicImage::ImageLuma8(contrast_stretch(&image.to_luma8(), 2.0, 98.0))
        }
        EnhancementStrategy::Sharpen => {
            DynamicImage::ImageRgb8(imageops::unsharpen(&image.to_rgb8(), 1.5, 4))
        }
        EnhancementStrategy::Denoise => {
            DynamicImage::ImageLuma8(median_filter(&image.to_luma8(), 1, 1))
        }
        EnhancementStrategy::Binarization => {
            DynamicImage::ImageLuma8(binarize(&image.to_luma8(), 200))
        }
        EnhancementStrategy::Deskew => DynamicImage::ImageLuma8(deskew(&image.to_luma8())),
    }
}

/// Largest skew magnitude the estimator searches for, in degrees. Scans
/// misfed by more than this are beyond gentle correction anyway.
const DESKEW_MAX_ANGLE: f64 = 15.0;
const DESKEW_ANGLE_STEP: f64 = 0.5;

/// Rotate the page so text lines run horizontal. No-op when the estimated
/// skew is below the search resolution.
fn deskew(gray: &GrayImage) -> GrayImage {
    let angle = estimate_skew_angle(gray);
    if angle.abs() < DESKEW_ANGLE_STEP {
        return gray.clone();
    }
    // The estimator reports the text-line slope under a counterclockwise
    // projection; rotate_about_center takes clockwise angles, so negate.
    // Exposed margins fill with white, matching paper background.
    rotate_about_center(
        gray,
        (-angle).to_radians() as f32,
        Interpolation::Bilinear,
        Luma([255]),
    )
}

/// Estimate the skew of dark-on-light text by projection-profile search:
/// for each candidate angle, project sampled dark pixels onto rows and
/// score how sharply they cluster. The angle whose projection has the
/// highest energy is the text-line slope (positive = lines descending to
/// the right).
fn estimate_skew_angle(gray: &GrayImage) -> f64 {
    let (width, height) = gray.dimensions();
    let step = ((width.max(height) / 512).max(1)) as usize;

    let mut points = Vec::new();
    for y in (0..height).step_by(step) {
        for x in (0..width).step_by(step) {
            if gray.get_pixel(x, y)[0] < 128 {
                points.push((x as f64, y as f64));
            }
        }
    }
    // Too little ink to estimate anything.
    if points.len() < 16 {
        return 0.0;
    }

    let offset = width as f64;
    let bins = (height as f64 + 2.0 * width as f64) as usize + 1;

    let mut best_angle = 0.0;
    let mut best_score = f64::MIN;
    let mut angle = -DESKEW_MAX_ANGLE;
    while angle <= DESKEW_MAX_ANGLE {
        let (sin, cos) = angle.to_radians().sin_cos();
        let mut histogram = vec![0u32; bins];
        for &(x, y) in &points {
            let projected = y * cos - x * sin + offset;
            if projected >= 0.0 && (projected as usize) < bins {
                histogram[projected as usize] += 1;
            }
        }
        let score: f64 = histogram.iter().map(|&c| (c as f64) * (c as f64)).sum();
        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
        angle += DESKEW_ANGLE_STEP;
    }
    best_angle
}

/// Linear contrast stretch between the given low/high percentiles of the
/// intensity histogram.
fn contrast_stretch(gray: &GrayImage, low_pct: f64, high_pct: f64) -> GrayImage {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return gray.clone();
    }

    let low_target = (total as f64 * low_pct / 100.0) as u64;
    let high_target = (total as f64 * high_pct / 100.0) as u64;

    let mut cumulative = 0u64;
    let mut low = 0u8;
    let mut high = 255u8;
    let mut low_found = false;
    for (value, &count) in histogram.iter().enumerate() {
        cumulative += count;
        if !low_found && cumulative >= low_target {
            low = value as u8;
            low_found = true;
        }
        if cumulative >= high_target {
            high = value as u8;
            break;
        }
    }

    if high <= low {
        return gray.clone();
    }

    let range = (high - low) as f64;
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        let stretched = ((pixel[0] as f64 - low as f64) * 255.0 / range).clamp(0.0, 255.0);
        *pixel = Luma([stretched as u8]);
    }
    out
}

fn binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        *pixel = Luma([if pixel[0] > threshold { 255 } else { 0 }]);
    }
    out
}
