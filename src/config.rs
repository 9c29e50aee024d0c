//! Configuration types for extraction.
//!
//! Loads settings from config.json at startup. Every field has a default, so a
//! partial file only overrides what it names. The loaded value is passed down
//! explicitly; nothing here is global.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::ocr::engine::PageSegMode;
use crate::ocr::segment::EyeSide;

/// Unsharp-mask parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharpenConfig {
    /// Gaussian blur sigma in pixels
    pub radius: f32,
    /// Strength in percent (0 = no sharpening)
    pub amount: f32,
    /// Minimum difference from the blurred pixel before sharpening applies
    pub threshold: u8,
}

/// Preprocessing applied to a region before OCR.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Convert to grayscale
    pub grayscale: bool,
    /// Percent of pixels ignored at each histogram tail when stretching contrast
    pub autocontrast_cutoff: Option<f32>,
    /// Unsharp mask, `None` to skip
    pub sharpen: Option<SharpenConfig>,
    /// Pixels brighter than this become white, others black. `None` to skip.
    pub binarize_threshold: Option<u8>,
    /// Resize factor applied before the other filters
    pub upscale: Option<f32>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            grayscale: true,
            autocontrast_cutoff: Some(2.0),
            sharpen: Some(SharpenConfig {
                radius: 1.4,
                amount: 150.0,
                threshold: 3,
            }),
            binarize_threshold: None,
            upscale: None,
        }
    }
}

impl PreprocessConfig {
    /// Settings for the header crop: binarized, lighter sharpening.
    pub fn header_default() -> Self {
        Self {
            grayscale: true,
            autocontrast_cutoff: None,
            sharpen: Some(SharpenConfig {
                radius: 1.2,
                amount: 60.0,
                threshold: 2,
            }),
            binarize_threshold: Some(200),
            upscale: None,
        }
    }
}

/// OCR engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Tesseract language hint, `+`-joined (e.g. "por+eng")
    pub language: String,
    /// OCR engine mode
    pub oem: u8,
    /// Mode for the first pass over each half
    pub primary_psm: PageSegMode,
    /// Mode for the retry of incomplete halves
    pub alternate_psm: PageSegMode,
    /// Mode for the whole-page fallback pass
    pub whole_page_psm: PageSegMode,
    /// Optional character whitelist for the eye regions
    pub char_whitelist: Option<String>,
    /// Explicit path to the tesseract executable
    pub tesseract_path: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "por+eng".to_string(),
            oem: 3,
            primary_psm: PageSegMode::Block,
            alternate_psm: PageSegMode::SparseText,
            whole_page_psm: PageSegMode::Block,
            char_whitelist: None,
            tesseract_path: None,
        }
    }
}

/// Page segmentation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Which page half holds the right eye
    pub eye_side: EyeSide,
    /// Fraction of the page height used as the header (patient name)
    pub header_ratio: f32,
    /// Characters kept on each side of an eye marker in whole-page fallback
    pub marker_window: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            eye_side: EyeSide::LeftIsOd,
            header_ratio: 0.22,
            marker_window: 250,
        }
    }
}

/// PDF input settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Render resolution for the first page
    pub dpi: u32,
    /// Minimum embedded-text length before the text layer is trusted
    pub text_layer_min_chars: usize,
    /// Read the PDF text layer before running OCR
    pub use_text_layer: bool,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            text_layer_min_chars: 50,
            use_text_layer: true,
        }
    }
}

/// Complete extraction configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub ocr: OcrConfig,
    /// Preprocessing for the eye halves and the whole page
    pub preprocess: PreprocessConfig,
    /// Preprocessing for the header crop
    pub header_preprocess: PreprocessConfig,
    pub segmentation: SegmentationConfig,
    pub document: DocumentConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ocr: OcrConfig::default(),
            preprocess: PreprocessConfig::default(),
            header_preprocess: PreprocessConfig::header_default(),
            segmentation: SegmentationConfig::default(),
            document: DocumentConfig::default(),
        }
    }
}

impl ExtractionConfig {
    /// Loads configuration from `path`, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load(config_path: &Path) -> Self {
        log::info!("Looking for config at: {}", config_path.display());

        if !config_path.exists() {
            log::info!("{} not found. Using default config.", config_path.display());
            return Self::default();
        }

        match fs::read_to_string(config_path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("Config loaded from {}", config_path.display());
                    config
                }
                Err(e) => {
                    log::warn!(
                        "Failed to parse {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!(
                    "Failed to read {}: {}. Using defaults.",
                    config_path.display(),
                    e
                );
                Self::default()
            }
        }
    }
}
