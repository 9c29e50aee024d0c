//! Error types for the extraction pipeline.
//!
//! Only `Failed` ever leaves the orchestrator. The other variants are
//! produced per attempt or per field and absorbed where they occur.

use thiserror::Error;

use crate::ocr::segment::RegionKind;

#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Preprocessing or recognition failed for one region in one attempt
    #[error("OCR attempt on {region} failed: {message}")]
    RegionProcessing { region: RegionKind, message: String },

    /// A matched span could not be converted to a number
    #[error("Matched text '{text}' is not a number")]
    NumericConversion { text: String },

    /// Every recognition attempt raised
    #[error("Extraction failed: all {attempts} OCR attempts raised (last: {last_error})")]
    Failed { attempts: usize, last_error: String },
}

pub type ExtractionResult<T> = std::result::Result<T, ExtractionError>;
