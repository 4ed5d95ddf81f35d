//! Fixed set of image operations offered to the model as a tool.
//!
//! Requests name operations by tag (`{"operation": "gaussian_blur", "sigma": 2.0}`)
//! and are applied in order to a copy of the input image.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Pixel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AnalysisError, AnalysisResult};

const MAX_RADIUS: u32 = 25;
const MAX_DIMENSION: u32 = 8192;
const EDGE_DIFFERENCE: f32 = 30.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ImageOperation {
    Grayscale,
    GaussianBlur { sigma: f32 },
    /// Gradient magnitude above `threshold` becomes white
    EdgeDetect {
        #[serde(default = "default_edge_threshold")]
        threshold: f32,
    },
    Threshold { level: u8 },
    Dilate { radius: u32 },
    Erode { radius: u32 },
    MorphOpen { radius: u32 },
    MorphClose { radius: u32 },
    Invert,
    Resize { width: u32, height: u32 },
}

fn default_edge_threshold() -> f32 {
    50.0
}

impl ImageOperation {
    pub fn validate(&self) -> AnalysisResult<()> {
        let invalid = |msg: String| Err(AnalysisError::ImageOperation(msg));
        match *self {
            Self::GaussianBlur { sigma } if !(sigma.is_finite() && sigma > 0.0) => {
                invalid(format!("gaussian_blur sigma must be positive, got {}", sigma))
            }
            Self::EdgeDetect { threshold } if !(threshold.is_finite() && threshold >= 0.0) => {
                invalid(format!("edge_detect threshold must be non-negative, got {}", threshold))
            }
            Self::Dilate { radius } | Self::Erode { radius } | Self::MorphOpen { radius } | Self::MorphClose { radius }
                if radius == 0 || radius > MAX_RADIUS =>
            {
                invalid(format!("{} radius must be between 1 and {}, got {}", self.name(), MAX_RADIUS, radius))
            }
            Self::Resize { width, height }
                if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION =>
            {
                invalid(format!(
                    "resize dimensions must be between 1 and {}, got {}x{}",
                    MAX_DIMENSION, width, height
                ))
            }
            _ => Ok(()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Grayscale => "grayscale",
            Self::GaussianBlur { .. } => "gaussian_blur",
            Self::EdgeDetect { .. } => "edge_detect",
            Self::Threshold { .. } => "threshold",
            Self::Dilate { .. } => "dilate",
            Self::Erode { .. } => "erode",
            Self::MorphOpen { .. } => "morph_open",
            Self::MorphClose { .. } => "morph_close",
            Self::Invert => "invert",
            Self::Resize { .. } => "resize",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::GaussianBlur { sigma } => format!("gaussian_blur(sigma={})", sigma),
            Self::EdgeDetect { threshold } => format!("edge_detect(threshold={})", threshold),
            Self::Threshold { level } => format!("threshold(level={})", level),
            Self::Dilate { radius } | Self::Erode { radius } | Self::MorphOpen { radius } | Self::MorphClose { radius } => {
                format!("{}(radius={})", self.name(), radius)
            }
            Self::Resize { width, height } => format!("resize({}x{})", width, height),
            Self::Grayscale | Self::Invert => self.name().to_string(),
        }
    }

    pub fn apply(&self, image: DynamicImage) -> AnalysisResult<DynamicImage> {
        self.validate()?;
        let result = match *self {
            Self::Grayscale => image.grayscale(),
            Self::GaussianBlur { sigma } => image.blur(sigma),
            Self::EdgeDetect { threshold } => DynamicImage::ImageLuma8(edge_map(&image.to_luma8(), threshold)),
            Self::Threshold { level } => {
                let mut gray = image.to_luma8();
                for pixel in gray.pixels_mut() {
                    pixel.0[0] = if pixel.0[0] > level { 255 } else { 0 };
                }
                DynamicImage::ImageLuma8(gray)
            }
            Self::Dilate { radius } => morph(&image, radius, Morph::Dilate),
            Self::Erode { radius } => morph(&image, radius, Morph::Erode),
            Self::MorphOpen { radius } => morph(&morph(&image, radius, Morph::Erode), radius, Morph::Dilate),
            Self::MorphClose { radius } => morph(&morph(&image, radius, Morph::Dilate), radius, Morph::Erode),
            Self::Invert => {
                let mut image = image;
                image.invert();
                image
            }
            Self::Resize { width, height } => image.resize_exact(width, height, FilterType::Lanczos3),
        };
        Ok(result)
    }
}

#[derive(Clone, Copy)]
enum Morph {
    Dilate,
    Erode,
}

/// Square-window max (dilate) or min (erode) filter, per channel.
fn morph(image: &DynamicImage, radius: u32, op: Morph) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(gray) => DynamicImage::ImageLuma8(morph_buffer(gray, radius, op)),
        other => DynamicImage::ImageRgb8(morph_buffer(&other.to_rgb8(), radius, op)),
    }
}

fn morph_buffer<P: Pixel<Subpixel = u8>>(
    image: &ImageBuffer<P, Vec<u8>>,
    radius: u32,
    op: Morph,
) -> ImageBuffer<P, Vec<u8>> {
    let (width, height) = image.dimensions();
    let mut out = image.clone();
    for y in 0..height {
        for x in 0..width {
            let mut acc = *image.get_pixel(x, y);
            for ny in y.saturating_sub(radius)..=(y + radius).min(height - 1) {
                for nx in x.saturating_sub(radius)..=(x + radius).min(width - 1) {
                    let neighbour = image.get_pixel(nx, ny);
                    for (a, b) in acc.channels_mut().iter_mut().zip(neighbour.channels()) {
                        *a = match op {
                            Morph::Dilate => (*a).max(*b),
                            Morph::Erode => (*a).min(*b),
                        };
                    }
                }
            }
            out.put_pixel(x, y, acc);
        }
    }
    out
}

/// Central-difference gradient magnitude, binarised at `threshold`.
fn edge_map(gray: &GrayImage, threshold: f32) -> GrayImage {
    let (width, height) = gray.dimensions();
    let mut edges = GrayImage::new(width, height);
    if width < 3 || height < 3 {
        return edges;
    }
    let value = |x: u32, y: u32| f32::from(gray.get_pixel(x, y).0[0]);
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let grad_x = value(x + 1, y) - value(x - 1, y);
            let grad_y = value(x, y + 1) - value(x, y - 1);
            if (grad_x * grad_x + grad_y * grad_y).sqrt() > threshold {
                edges.put_pixel(x, y, Luma([255]));
            }
        }
    }
    edges
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageStats {
    pub width: u32,
    pub height: u32,
    pub mean_brightness: f32,
    /// Share of interior pixels that differ sharply from a neighbour
    pub edge_density: f32,
}

impl ImageStats {
    pub fn measure(image: &DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();

        let pixel_count = (width as usize * height as usize).max(1);
        let total: f32 = rgb
            .pixels()
            .map(|p| f32::from(p[0]) * 0.299 + f32::from(p[1]) * 0.587 + f32::from(p[2]) * 0.114)
            .sum();
        let mean_brightness = if width == 0 || height == 0 {
            0.0
        } else {
            total / pixel_count as f32
        };

        let mut edge_count = 0usize;
        let mut interior = 0usize;
        if width >= 2 && height >= 2 {
            let difference = |a: &image::Rgb<u8>, b: &image::Rgb<u8>| {
                a.0.iter()
                    .zip(b.0.iter())
                    .map(|(x, y)| (f32::from(*x) - f32::from(*y)).abs())
                    .sum::<f32>()
                    / 3.0
            };
            for y in 0..height - 1 {
                for x in 0..width - 1 {
                    let current = rgb.get_pixel(x, y);
                    if difference(current, rgb.get_pixel(x + 1, y)) > EDGE_DIFFERENCE
                        || difference(current, rgb.get_pixel(x, y + 1)) > EDGE_DIFFERENCE
                    {
                        edge_count += 1;
                    }
                    interior += 1;
                }
            }
        }

        Self {
            width,
            height,
            mean_brightness,
            edge_density: if interior > 0 { edge_count as f32 / interior as f32 } else { 0.0 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedImage {
    pub output_path: PathBuf,
    pub applied: Vec<String>,
    pub stats: ImageStats,
}

impl ProcessedImage {
    pub fn render(&self) -> String {
        let applied = if self.applied.is_empty() {
            "none".to_string()
        } else {
            self.applied.join(", ")
        };
        format!(
            "Applied {} operations: {}\nOutput size: {}x{}\nMean brightness: {:.2}\nEdge density: {:.4}\nSaved 1 processed images.\nSaved image path: {}",
            self.applied.len(),
            applied,
            self.stats.width,
            self.stats.height,
            self.stats.mean_brightness,
            self.stats.edge_density,
            self.output_path.display()
        )
    }
}

/// Loads an image, applies operations in order and writes
/// `processed_<uuid>.png` under the output directory.
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    output_dir: PathBuf,
}

impl ImageProcessor {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub async fn process(&self, image_path: &Path, operations: &[ImageOperation]) -> AnalysisResult<ProcessedImage> {
        if !image_path.exists() {
            return Err(AnalysisError::image_not_found(image_path));
        }
        for op in operations {
            op.validate()?;
        }
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let input = image_path.to_path_buf();
        let output_path = self.output_dir.join(format!("processed_{}.png", Uuid::new_v4()));
        let target = output_path.clone();
        let operations = operations.to_vec();

        let (applied, stats) = tokio::task::spawn_blocking(move || -> AnalysisResult<(Vec<String>, ImageStats)> {
            let mut image = image::open(&input).map_err(|e| AnalysisError::image_decode(&input, e.to_string()))?;
            let mut applied = Vec::with_capacity(operations.len());
            for op in &operations {
                debug!("Applying {}", op.describe());
                image = op.apply(image)?;
                applied.push(op.describe());
            }
            image
                .save(&target)
                .map_err(|e| AnalysisError::ImageOperation(format!("Failed to save {}: {}", target.display(), e)))?;
            Ok((applied, ImageStats::measure(&image)))
        })
        .await
        .map_err(|e| AnalysisError::ImageOperation(format!("Image worker failed: {}", e)))??;

        info!("🖼️ Processed image saved: {}", output_path.display());
        Ok(ProcessedImage {
            output_path,
            applied,
            stats,
        })
    }
}
