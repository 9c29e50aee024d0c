//! Turns an input file into a page raster plus any embedded text.
//!
//! PDFs go through the poppler command-line tools: `pdftoppm` renders the
//! first page and `pdftotext` reads the text layer. Any other file is opened
//! as an image.

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

use crate::config::DocumentConfig;

/// One page ready for extraction.
#[derive(Debug, Clone)]
pub struct PageInput {
    pub image: DynamicImage,
    /// Embedded text, `None` for images or PDFs without a usable text layer
    pub text_layer: Option<String>,
}

impl PageInput {
    /// Returns the text layer when it is long enough to be trusted.
    pub fn usable_text(&self, min_chars: usize) -> Option<&str> {
        self.text_layer
            .as_deref()
            .filter(|text| text.trim().chars().count() > min_chars)
    }
}

pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Loads the first page of `path`.
///
/// A page that cannot be rendered is an error. A failing text-layer read
/// only means there is no text layer.
pub fn load_page(path: &Path, config: &DocumentConfig) -> Result<PageInput> {
    if !path.exists() {
        return Err(anyhow!("Input not found: {}", path.display()));
    }

    if !is_pdf(path) {
        let image = image::open(path)
            .with_context(|| format!("Failed to open image {}", path.display()))?;
        return Ok(PageInput {
            image,
            text_layer: None,
        });
    }

    let image = render_first_page(path, config.dpi)?;
    let text_layer = if config.use_text_layer {
        match read_text_layer(path) {
            Ok(text) => Some(text),
            Err(e) => {
                log::debug!("No text layer for {}: {:#}", path.display(), e);
                None
            }
        }
    } else {
        None
    };

    Ok(PageInput { image, text_layer })
}

/// Renders page 1 with `pdftoppm -singlefile -png -r <dpi>`.
pub fn render_first_page(pdf: &Path, dpi: u32) -> Result<DynamicImage> {
    let work_dir = tempdir()?;
    let output_base = work_dir.path().join("page");

    let output = Command::new("pdftoppm")
        .arg("-f")
        .arg("1")
        .arg("-l")
        .arg("1")
        .arg("-singlefile")
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(pdf)
        .arg(&output_base)
        .output()
        .context("Failed to start pdftoppm (is poppler-utils installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("pdftoppm failed: {}", stderr.trim()));
    }

    // pdftoppm appends the extension itself
    let png_path = output_base.with_extension("png");
    let image = image::open(&png_path)
        .with_context(|| format!("Failed to read rendered page {}", png_path.display()))?;

    log::debug!(
        "Rendered {} at {} dpi ({}x{})",
        pdf.display(),
        dpi,
        image.width(),
        image.height()
    );
    Ok(image)
}

/// Reads the embedded text of page 1 with `pdftotext` in reading order.
pub fn read_text_layer(pdf: &Path) -> Result<String> {
    let output = Command::new("pdftotext")
        .arg("-f")
        .arg("1")
        .arg("-l")
        .arg("1")
        .arg(pdf)
        .arg("-")
        .output()
        .context("Failed to start pdftotext")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("pdftotext failed: {}", stderr.trim()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use std::path::PathBuf;

    #[test]
    fn test_is_pdf() {
        assert!(is_pdf(&PathBuf::from("exam.pdf")));
        assert!(is_pdf(&PathBuf::from("scans/EXAM.PDF")));
        assert!(!is_pdf(&PathBuf::from("exam.png")));
        assert!(!is_pdf(&PathBuf::from("pdf")));
    }

    #[test]
    fn test_load_image_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("page.png");
        GrayImage::from_pixel(40, 20, Luma([200])).save(&path).unwrap();

        let page = load_page(&path, &DocumentConfig::default()).unwrap();

        assert_eq!((page.image.width(), page.image.height()), (40, 20));
        assert!(page.text_layer.is_none());
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let dir = tempdir().unwrap();
        let result = load_page(&dir.path().join("absent.pdf"), &DocumentConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_usable_text_threshold() {
        let page = PageInput {
            image: DynamicImage::ImageLuma8(GrayImage::new(1, 1)),
            text_layer: Some(format!("  {}  ", "x".repeat(50))),
        };
        assert!(page.usable_text(50).is_none());
        assert!(page.usable_text(49).is_some());

        let scanned = PageInput {
            text_layer: None,
            ..page
        };
        assert!(scanned.usable_text(0).is_none());
    }
}
