//! Extraction worker thread.
//!
//! Receives documents from the work queue and extracts them one at a time.
//! Each result is printed as one JSON line and optionally appended to a CSV.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;

use crate::batch::csv_writer::{append_to_csv, init_csv};
use crate::batch::export::DocumentReport;
use crate::batch::queue::ExtractionWorkItem;
use crate::document::{load_page, PageInput};
use crate::ocr::orchestrator::{AttemptStage, BiometryExtractor, Extraction, RawRegionText};
use crate::ocr::patient::detect_patient_name;
use crate::ocr::{RegionKind, TextRecognizer};

/// Counts reported when the queue closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub processed: usize,
    pub complete: usize,
    pub failed: usize,
}

/// Extracts one document.
pub fn process_document<R: TextRecognizer>(
    extractor: &BiometryExtractor<R>,
    path: &Path,
) -> Result<Extraction> {
    let page = load_page(path, &extractor.config().document)?;
    log::debug!("{}: page loaded", path.display());
    extract_page(extractor, &page)
}

/// Extracts a loaded page.
///
/// A PDF text layer is tried first. A complete record read eye by eye skips
/// OCR. Anything else only fills the fields OCR could not read.
pub fn extract_page<R: TextRecognizer>(
    extractor: &BiometryExtractor<R>,
    page: &PageInput,
) -> Result<Extraction> {
    let document = &extractor.config().document;

    let text_layer = if document.use_text_layer {
        page.usable_text(document.text_layer_min_chars)
            .map(|text| (text, extractor.extract_from_text(text)))
    } else {
        None
    };

    if let Some((text, layer)) = &text_layer {
        if layer.replaces_ocr() {
            log::info!("Complete from text layer, skipping OCR");
            let raw = RawRegionText {
                region: RegionKind::TextLayer,
                stage: AttemptStage::Primary,
                psm: None,
                binarized: false,
                text: text.to_string(),
            };
            return Ok(Extraction::new(layer.record, detect_patient_name(text), vec![raw]));
        }
        if layer.per_eye {
            log::debug!("Text layer incomplete, running OCR");
        } else {
            log::debug!("Text layer has no eye markers, running OCR");
        }
    }

    let mut extraction = extractor.extract(&page.image)?;

    if let Some((_, layer)) = text_layer {
        extraction.record.fill_missing_from(&layer.record);
        extraction.complete = extraction.record.is_complete();
    }

    Ok(extraction)
}

/// Runs the worker loop until the channel is closed (sender dropped).
///
/// Per-document failures are logged and skipped. This function blocks, so
/// run it in a dedicated thread.
pub fn run_extraction_worker<R: TextRecognizer>(
    receiver: Receiver<ExtractionWorkItem>,
    extractor: BiometryExtractor<R>,
    csv_path: Option<PathBuf>,
) -> WorkerSummary {
    log::info!("Extraction worker started");
    let mut summary = WorkerSummary::default();

    if let Some(path) = &csv_path {
        if let Err(e) = init_csv(path) {
            log::error!("Failed to initialize {}: {:#}", path.display(), e);
        }
    }

    while let Ok(work_item) = receiver.recv() {
        log::info!(
            "Processing document {} ({})",
            work_item.index,
            work_item.document_path.display()
        );

        let extraction = match process_document(&extractor, &work_item.document_path) {
            Ok(extraction) => extraction,
            Err(e) => {
                log::error!(
                    "Extraction failed for {}: {:#}",
                    work_item.document_path.display(),
                    e
                );
                summary.failed += 1;
                continue;
            }
        };

        summary.processed += 1;
        if extraction.complete {
            summary.complete += 1;
        }

        let report = DocumentReport::new(&work_item.document_path, &extraction);
        match serde_json::to_string(&report) {
            Ok(line) => println!("{}", line),
            Err(e) => log::error!("Failed to serialize result: {}", e),
        }

        if let Some(path) = &csv_path {
            if let Err(e) = append_to_csv(path, &work_item, &extraction) {
                log::error!(
                    "Failed to write CSV row for document {}: {:#}",
                    work_item.index,
                    e
                );
            }
        }
    }

    log::info!(
        "Extraction worker finished: {} processed ({} complete), {} failed",
        summary.processed,
        summary.complete,
        summary.failed
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::queue::create_work_queue;
    use crate::config::ExtractionConfig;
    use crate::ocr::engine::RecognitionParams;
    use image::{DynamicImage, GrayImage, Luma};
    use std::thread;
    use tempfile::tempdir;

    /// Answers by region width: 100 = left half, 101 = right half.
    struct HalfRecognizer;

    impl TextRecognizer for HalfRecognizer {
        fn recognize(&self, image: &DynamicImage, _params: &RecognitionParams) -> Result<String> {
            Ok(match image.width() {
                100 => "Comp. AL: 24.05\nMV: 43.20/44.80\nACD: 3.15mm".to_string(),
                101 => "Comp. AL: 23.90\nMV: 43.50/44.10\nACD: 3.22mm".to_string(),
                _ => String::new(),
            })
        }
    }

    fn extractor() -> BiometryExtractor<HalfRecognizer> {
        BiometryExtractor::new(HalfRecognizer, ExtractionConfig::default()).unwrap()
    }

    #[test]
    fn test_worker_exits_when_channel_closes() {
        let (sender, receiver) = create_work_queue();

        let handle = thread::spawn(move || run_extraction_worker(receiver, extractor(), None));
        drop(sender);

        let summary = handle.join().expect("Worker thread panicked");
        assert_eq!(summary, WorkerSummary::default());
    }

    #[test]
    fn test_worker_processes_documents_and_skips_failures() {
        let dir = tempdir().unwrap();
        let page_path = dir.path().join("exam.png");
        GrayImage::from_pixel(201, 100, Luma([255]))
            .save(&page_path)
            .unwrap();
        let csv_path = dir.path().join("results.csv");

        let (sender, receiver) = create_work_queue();
        sender
            .send(ExtractionWorkItem::new(page_path.clone(), 1))
            .unwrap();
        sender
            .send(ExtractionWorkItem::new(dir.path().join("missing.pdf"), 2))
            .unwrap();
        drop(sender);

        let summary = run_extraction_worker(receiver, extractor(), Some(csv_path.clone()));

        assert_eq!(
            summary,
            WorkerSummary {
                processed: 1,
                complete: 1,
                failed: 1
            }
        );
        let content = std::fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("true,24.05,43.2,44.8,3.15,23.9,43.5,44.1,3.22"));
    }

    #[test]
    fn test_process_image_document() {
        let dir = tempdir().unwrap();
        let page_path = dir.path().join("exam.png");
        GrayImage::from_pixel(201, 100, Luma([255]))
            .save(&page_path)
            .unwrap();

        let extraction = process_document(&extractor(), &page_path).unwrap();

        assert!(extraction.complete);
        assert_eq!(extraction.record.od.acd, Some(3.15));
        assert_eq!(extraction.record.os.al, Some(23.90));
    }

    fn page_with_text(text: &str) -> PageInput {
        PageInput {
            image: DynamicImage::ImageLuma8(GrayImage::from_pixel(201, 100, Luma([255]))),
            text_layer: Some(text.to_string()),
        }
    }

    #[test]
    fn test_markerless_text_layer_does_not_skip_ocr() {
        // Both eyes printed one after the other with no OD/OS markers
        let page = page_with_text(
            "Comp. AL: 24.05\nMV: 43.20/44.80\nACD: 3.15mm\n\
             Comp. AL: 23.90\nMV: 43.50/44.10\nACD: 3.22mm",
        );

        let extraction = extract_page(&extractor(), &page).unwrap();

        assert!(extraction.complete);
        assert_eq!(extraction.record.od.al, Some(24.05));
        assert_eq!(extraction.record.os.al, Some(23.90));
        assert_eq!(extraction.record.os.acd, Some(3.22));
        assert!(extraction
            .raw_texts
            .iter()
            .all(|raw| raw.region != RegionKind::TextLayer));
    }

    #[test]
    fn test_marked_text_layer_skips_ocr() {
        let page = page_with_text(
            "JOANA PEREIRA\nOD\nComp. AL: 22.50\nMV: 42.00/42.75\nACD: 2.90mm\n\
             OS\nComp. AL: 22.60\nMV: 42.10/42.90\nACD: 2.95mm",
        );

        let extraction = extract_page(&extractor(), &page).unwrap();

        assert!(extraction.complete);
        assert_eq!(extraction.record.od.al, Some(22.50));
        assert_eq!(extraction.record.os.al, Some(22.60));
        assert_eq!(extraction.record.os.acd, Some(2.95));
        assert_eq!(extraction.patient_name, "JOANA PEREIRA");
        assert_eq!(extraction.raw_texts.len(), 1);
        assert_eq!(extraction.raw_texts[0].region, RegionKind::TextLayer);
    }
}
