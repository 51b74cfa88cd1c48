//! Optional image cleanup applied before dispatch.

use std::fmt;
use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, ImageFormat, ImageReader, Luma};
use tracing::debug;

use crate::config::PreprocessingConfig;
use crate::error::InputError;
use crate::source::ImageBytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PreprocessOp {
    /// Send the image unchanged.
    #[default]
    None,
    /// Luma conversion plus contrast stretch.
    Grayscale,
    /// Upscale small images, stretch contrast, then binarize (Otsu).
    Threshold,
}

impl fmt::Display for PreprocessOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PreprocessOp::None => "none",
            PreprocessOp::Grayscale => "grayscale",
            PreprocessOp::Threshold => "threshold",
        };
        f.write_str(name)
    }
}

/// Apply `op` to `image`. Anything other than [`PreprocessOp::None`] yields a PNG.
pub fn preprocess(
    image: &ImageBytes,
    op: PreprocessOp,
    config: &PreprocessingConfig,
) -> Result<ImageBytes, InputError> {
    if op == PreprocessOp::None {
        return Ok(image.clone());
    }

    let img = ImageReader::new(Cursor::new(image.bytes()))
        .with_guessed_format()
        .map_err(|e| InputError::NotAnImage(format!("Failed to read image: {e}")))?
        .decode()
        .map_err(|e| InputError::NotAnImage(format!("Failed to decode image: {e}")))?;

    // Zero would make every resize degenerate.
    let max_dim = config.max_image_dimension.max(1);
    let target_width = config.target_width.max(1);

    let (width, height) = img.dimensions();
    let img = fit_within(img, max_dim);

    let gray = match op {
        PreprocessOp::Threshold => {
            let img = upscale_to_width(img, target_width, max_dim);
            binarize(&stretch_contrast(img.to_luma8()))
        }
        _ => stretch_contrast(img.to_luma8()),
    };

    debug!(
        op = %op,
        from = %format!("{width}x{height}"),
        to = %format!("{}x{}", gray.width(), gray.height()),
        "Preprocessed image"
    );

    let mut output = Vec::new();
    DynamicImage::ImageLuma8(gray)
        .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|e| InputError::NotAnImage(format!("Failed to encode image: {e}")))?;

    ImageBytes::new(output, "image/png")
}

/// Downscale so neither side exceeds `max_dim`, keeping the aspect ratio.
fn fit_within(img: DynamicImage, max_dim: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max_dim && height <= max_dim {
        return img;
    }
    img.resize(max_dim, max_dim, FilterType::Lanczos3)
}

/// Scale narrow images up to `target_width` without letting the height pass `max_dim`.
fn upscale_to_width(img: DynamicImage, target_width: u32, max_dim: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width == 0 || width >= target_width {
        return img;
    }

    let scale = target_width as f64 / width as f64;
    let new_height = ((height as f64 * scale).round() as u32).clamp(1, max_dim);
    let new_width = if new_height == max_dim {
        ((width as f64 * max_dim as f64 / height as f64).round() as u32).max(1)
    } else {
        target_width
    };

    img.resize_exact(new_width, new_height, FilterType::CatmullRom)
}

/// Histogram stretch: darkest pixel to 0, lightest to 255.
fn stretch_contrast(gray: GrayImage) -> GrayImage {
    let (min, max) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));

    if max <= min {
        return gray;
    }

    let range = (max - min) as f32;
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y)[0];
        Luma([(((value - min) as f32 / range) * 255.0).round() as u8])
    })
}

fn binarize(gray: &GrayImage) -> GrayImage {
    let threshold = otsu_threshold(gray);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Level maximising the between-class variance of the histogram.
fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 127;
    }
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let mut background_weight = 0u64;
    let mut background_sum = 0f64;
    let mut best_variance = -1f64;
    let mut best_level = 0u8;

    for (level, &count) in histogram.iter().enumerate() {
        background_weight += count;
        if background_weight == 0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0 {
            break;
        }

        background_sum += level as f64 * count as f64;
        let background_mean = background_sum / background_weight as f64;
        let foreground_mean = (weighted_total - background_sum) / foreground_weight as f64;
        let variance = background_weight as f64
            * foreground_weight as f64
            * (background_mean - foreground_mean).powi(2);

        if variance > best_variance {
            best_variance = variance;
            best_level = level as u8;
        }
    }

    best_level
}
