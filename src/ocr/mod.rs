//! OCR pipeline: page → eye regions → prepared regions → text → measurements.

pub mod engine;
pub mod extract;
pub mod orchestrator;
pub mod patient;
pub mod preprocess;
pub mod segment;
pub mod setup;

pub use engine::TextRecognizer;
pub use orchestrator::{BiometryExtractor, Extraction};
pub use segment::{EyeSide, RegionKind};
pub use setup::ensure_tesseract;
