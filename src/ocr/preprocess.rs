use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};

use crate::config::{PreprocessConfig, SharpenConfig};

/// Prepares a region for OCR.
///
/// Stages run in a fixed order: grayscale, upscale, autocontrast, sharpen,
/// binarize. Binarization always works on luma, so it implies a grayscale
/// conversion even when `grayscale` is off. With every stage disabled the
/// region is returned unchanged.
pub fn preprocess_region(img: &DynamicImage, config: &PreprocessConfig) -> DynamicImage {
    let to_luma = config.grayscale || config.binarize_threshold.is_some();

    let mut current = if to_luma {
        DynamicImage::ImageLuma8(img.to_luma8())
    } else {
        img.clone()
    };

    if let Some(factor) = config.upscale {
        current = upscale(&current, factor);
    }

    if let DynamicImage::ImageLuma8(gray) = &current {
        let mut gray = gray.clone();

        if let Some(cutoff) = config.autocontrast_cutoff {
            gray = autocontrast(&gray, cutoff);
        }
        if let Some(sharpen) = &config.sharpen {
            gray = unsharp_mask(&gray, sharpen);
        }
        if let Some(threshold) = config.binarize_threshold {
            gray = binarize(&gray, threshold);
        }

        current = DynamicImage::ImageLuma8(gray);
    }

    current
}

/// Resizes by `factor`. Factors at or below 1.0 leave the image alone.
pub fn upscale(img: &DynamicImage, factor: f32) -> DynamicImage {
    if factor <= 1.0 {
        return img.clone();
    }
    let width = ((img.width() as f32) * factor).round() as u32;
    let height = ((img.height() as f32) * factor).round() as u32;
    img.resize_exact(width, height, FilterType::CatmullRom)
}

/// Stretches the histogram to the full 0..=255 range, ignoring `cutoff`
/// percent of the pixels at each tail.
pub fn autocontrast(img: &GrayImage, cutoff: f32) -> GrayImage {
    let total = (img.width() as u64) * (img.height() as u64);
    if total == 0 {
        return img.clone();
    }

    let mut histogram = [0u64; 256];
    for pixel in img.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let clip = ((total as f64) * (cutoff.clamp(0.0, 49.0) as f64) / 100.0) as u64;

    let mut low = 0usize;
    let mut seen = 0u64;
    for (value, &count) in histogram.iter().enumerate() {
        seen += count;
        if seen > clip {
            low = value;
            break;
        }
    }

    let mut high = 255usize;
    seen = 0;
    for (value, &count) in histogram.iter().enumerate().rev() {
        seen += count;
        if seen > clip {
            high = value;
            break;
        }
    }

    if high <= low {
        return img.clone();
    }

    let scale = 255.0 / (high - low) as f32;
    let mut lut = [0u8; 256];
    for (value, slot) in lut.iter_mut().enumerate() {
        let stretched = (value as f32 - low as f32) * scale;
        *slot = stretched.round().clamp(0.0, 255.0) as u8;
    }

    let (width, height) = img.dimensions();
    GrayImage::from_fn(width, height, |x, y| Luma([lut[img.get_pixel(x, y)[0] as usize]]))
}

/// Unsharp mask: `out = orig + amount * (orig - blur)` wherever the
/// difference exceeds `threshold`. An amount of zero is the identity.
pub fn unsharp_mask(img: &GrayImage, config: &SharpenConfig) -> GrayImage {
    if config.amount <= 0.0 || config.radius <= 0.0 {
        return img.clone();
    }

    let blurred = image::imageops::blur(img, config.radius);
    let amount = config.amount / 100.0;
    let threshold = config.threshold as i32;

    let (width, height) = img.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let orig = img.get_pixel(x, y)[0] as i32;
        let diff = orig - blurred.get_pixel(x, y)[0] as i32;
        if diff.abs() < threshold {
            return Luma([orig as u8]);
        }
        let value = orig as f32 + amount * diff as f32;
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

/// Maps every pixel to black or white.
///
/// Pixels brighter than `threshold` become white (background), all others
/// black (text).
pub fn binarize(img: &GrayImage, threshold: u8) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut output = GrayImage::new(width, height);

    for (x, y, pixel) in img.enumerate_pixels() {
        let value = if pixel[0] > threshold { 255u8 } else { 0u8 };
        output.put_pixel(x, y, Luma([value]));
    }

    output
}
