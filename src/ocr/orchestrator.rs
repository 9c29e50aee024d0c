//! Drives one page through segmentation, preprocessing, recognition and
//! parsing, with a bounded fallback cascade for incomplete eyes.
//!
//! Order of attempts:
//! 1. primary mode on both halves
//! 2. alternate mode on the incomplete halves only
//! 3. one whole-page pass, segmented by eye markers
//!
//! Each stage only fills fields that are still absent. A record that is
//! still incomplete after step 3 is returned as is.

use anyhow::Result;
use image::DynamicImage;
use serde::Serialize;

use crate::biometry::{BiometryRecord, Eye};
use crate::config::{ExtractionConfig, PreprocessConfig};
use crate::error::{ExtractionError, ExtractionResult};

use super::engine::{PageSegMode, RecognitionParams, TextRecognizer};
use super::extract::FieldParser;
use super::patient::detect_patient_name;
use super::preprocess::preprocess_region;
use super::segment::{header_region, split_eyes, MarkerSegmenter, RegionKind};

/// Which step of the cascade produced a piece of text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStage {
    Primary,
    Alternate,
    WholePage,
    Header,
}

/// Recognized text with its provenance.
#[derive(Debug, Clone, Serialize)]
pub struct RawRegionText {
    pub region: RegionKind,
    pub stage: AttemptStage,
    /// `None` when the text did not come from OCR (PDF text layer)
    pub psm: Option<PageSegMode>,
    pub binarized: bool,
    pub text: String,
}

/// Result of extracting one document.
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    #[serde(flatten)]
    pub record: BiometryRecord,
    /// Empty when no header line looked like a name
    pub patient_name: String,
    pub complete: bool,
    #[serde(skip)]
    pub raw_texts: Vec<RawRegionText>,
}

impl Extraction {
    pub fn new(record: BiometryRecord, patient_name: String, raw_texts: Vec<RawRegionText>) -> Self {
        Self {
            complete: record.is_complete(),
            record,
            patient_name,
            raw_texts,
        }
    }
}

/// Measurements read from text that did not come from OCR.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TextLayerRecord {
    pub record: BiometryRecord,
    /// False when the text had no eye markers and one block was applied to
    /// both eyes
    pub per_eye: bool,
}

impl TextLayerRecord {
    /// Only a complete record read eye by eye may stand in for OCR. A
    /// markerless record can only fill fields OCR left absent.
    pub fn replaces_ocr(&self) -> bool {
        self.per_eye && self.record.is_complete()
    }
}

/// Bookkeeping for the measurement attempts of one page.
#[derive(Default)]
struct AttemptLog {
    attempts: usize,
    failures: usize,
    last_error: Option<String>,
    raw_texts: Vec<RawRegionText>,
}

impl AttemptLog {
    fn all_failed(&self) -> bool {
        self.attempts > 0 && self.failures == self.attempts
    }
}

pub struct BiometryExtractor<R: TextRecognizer> {
    recognizer: R,
    parser: FieldParser,
    markers: MarkerSegmenter,
    config: ExtractionConfig,
}

impl<R: TextRecognizer> BiometryExtractor<R> {
    pub fn new(recognizer: R, config: ExtractionConfig) -> Result<Self> {
        Ok(Self {
            recognizer,
            parser: FieldParser::new()?,
            markers: MarkerSegmenter::new(config.segmentation.marker_window)?,
            config,
        })
    }

    pub fn recognizer(&self) -> &R {
        &self.recognizer
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extracts both eyes and the patient name from one rendered page.
    ///
    /// An incomplete record is a normal result. `Failed` is returned only
    /// when every measurement attempt raised.
    pub fn extract(&self, page: &DynamicImage) -> ExtractionResult<Extraction> {
        let mut tally = AttemptLog::default();
        let mut record = BiometryRecord::default();
        let regions = split_eyes(page, self.config.segmentation.eye_side);

        for eye in [Eye::Od, Eye::Os] {
            if let Some(text) = self.recognize(
                regions.get(eye),
                RegionKind::half_for(eye),
                AttemptStage::Primary,
                &mut tally,
            ) {
                *record.eye_mut(eye) = self.parser.parse_eye(&text);
            }
        }

        if record.is_complete() {
            log::debug!("Both eyes complete after primary pass");
        } else {
            for eye in record.incomplete_eyes() {
                log::info!(
                    "{} missing {:?} after primary pass, retrying with {}",
                    eye,
                    record.eye(eye).missing_fields(),
                    self.config.ocr.alternate_psm
                );
                if let Some(text) = self.recognize(
                    regions.get(eye),
                    RegionKind::half_for(eye),
                    AttemptStage::Alternate,
                    &mut tally,
                ) {
                    let retry = self.parser.parse_eye(&text);
                    record.eye_mut(eye).fill_missing_from(&retry);
                }
            }
        }

        if !record.is_complete() {
            self.whole_page_pass(page, &mut record, &mut tally);
        }

        if tally.all_failed() {
            return Err(ExtractionError::Failed {
                attempts: tally.attempts,
                last_error: tally.last_error.unwrap_or_default(),
            });
        }

        if !record.is_complete() {
            for eye in record.incomplete_eyes() {
                log::warn!(
                    "{} incomplete after all fallbacks, missing {:?}",
                    eye,
                    record.eye(eye).missing_fields()
                );
            }
        }

        let patient_name = self.patient_name(page, &mut tally);
        Ok(Extraction::new(record, patient_name, tally.raw_texts))
    }

    /// Parses text that did not come from OCR, such as a PDF text layer.
    ///
    /// When eye markers are present each eye is filled from its own marker
    /// chunks. Without markers the whole text is parsed once and applied to
    /// both eyes, and the result is flagged as not `per_eye`.
    pub fn extract_from_text(&self, text: &str) -> TextLayerRecord {
        let normalized = self.parser.normalize(text);
        let chunks = self.markers.chunks(&normalized);

        if chunks.is_empty() {
            log::debug!("No eye markers in text layer, parsing as one block");
            let eye = self.parser.parse_eye(&normalized);
            return TextLayerRecord {
                record: BiometryRecord { od: eye, os: eye },
                per_eye: false,
            };
        }

        let mut record = BiometryRecord::default();
        for eye in [Eye::Od, Eye::Os] {
            self.fill_from_chunks(&mut record, eye, chunks.for_eye(eye));
        }
        TextLayerRecord {
            record,
            per_eye: true,
        }
    }

    fn whole_page_pass(&self, page: &DynamicImage, record: &mut BiometryRecord, tally: &mut AttemptLog) {
        log::info!("Running whole-page fallback ({})", self.config.ocr.whole_page_psm);

        let Some(text) = self.recognize(page, RegionKind::WholePage, AttemptStage::WholePage, tally)
        else {
            return;
        };

        let normalized = self.parser.normalize(&text);
        let chunks = self.markers.chunks(&normalized);
        if chunks.is_empty() {
            log::warn!("No eye markers found in whole-page text");
            return;
        }

        for eye in record.incomplete_eyes() {
            self.fill_from_chunks(record, eye, chunks.for_eye(eye));
        }
    }

    /// Fills absent fields of `eye` from each chunk in document order.
    fn fill_from_chunks(&self, record: &mut BiometryRecord, eye: Eye, chunks: &[String]) {
        for chunk in chunks {
            if record.eye(eye).is_complete() {
                break;
            }
            let parsed = self.parser.parse_eye(chunk);
            record.eye_mut(eye).fill_missing_from(&parsed);
        }
    }

    fn patient_name(&self, page: &DynamicImage, tally: &mut AttemptLog) -> String {
        let header = header_region(page, self.config.segmentation.header_ratio);
        self.recognize(&header, RegionKind::Header, AttemptStage::Header, tally)
            .map(|text| detect_patient_name(&text))
            .unwrap_or_default()
    }

    /// Preprocesses and recognizes one region. Errors are logged and turned
    /// into `None`; header attempts are kept out of the failure count.
    fn recognize(
        &self,
        region_image: &DynamicImage,
        region: RegionKind,
        stage: AttemptStage,
        tally: &mut AttemptLog,
    ) -> Option<String> {
        let ocr = &self.config.ocr;
        let (psm, preprocess, whitelist) = match stage {
            AttemptStage::Primary => (ocr.primary_psm, &self.config.preprocess, true),
            AttemptStage::Alternate => (ocr.alternate_psm, &self.config.preprocess, true),
            AttemptStage::WholePage => (ocr.whole_page_psm, &self.config.preprocess, false),
            AttemptStage::Header => (ocr.primary_psm, &self.config.header_preprocess, false),
        };
        let counted = stage != AttemptStage::Header;
        if counted {
            tally.attempts += 1;
        }

        let params = RecognitionParams {
            language: ocr.language.clone(),
            psm,
            oem: ocr.oem,
            char_whitelist: if whitelist { ocr.char_whitelist.clone() } else { None },
        };

        match self.run_recognizer(region_image, preprocess, &params) {
            Ok(text) => {
                log::debug!("{} ({:?}, {}): {:?}", region, stage, psm, text);
                tally.raw_texts.push(RawRegionText {
                    region,
                    stage,
                    psm: Some(psm),
                    binarized: preprocess.binarize_threshold.is_some(),
                    text: text.clone(),
                });
                Some(text)
            }
            Err(e) => {
                let err = ExtractionError::RegionProcessing {
                    region,
                    message: format!("{:#}", e),
                };
                log::warn!("{}", err);
                if counted {
                    tally.failures += 1;
                    tally.last_error = Some(err.to_string());
                }
                None
            }
        }
    }

    fn run_recognizer(
        &self,
        region_image: &DynamicImage,
        preprocess: &PreprocessConfig,
        params: &RecognitionParams,
    ) -> Result<String> {
        let prepared = preprocess_region(region_image, preprocess);
        self.recognizer.recognize(&prepared, params)
    }
}
