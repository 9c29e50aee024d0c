//! Work queue between the CLI and the extraction worker thread.
//!
//! Uses std::sync::mpsc channel for single-producer, single-consumer communication.
//! The CLI sends document paths, the worker receives and processes them in order.

use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};

/// A document waiting for extraction.
#[derive(Debug, Clone)]
pub struct ExtractionWorkItem {
    /// Path to the PDF or image
    pub document_path: PathBuf,
    /// Position in the batch (1-based)
    pub index: u32,
    pub queued_at: DateTime<Local>,
}

impl ExtractionWorkItem {
    pub fn new(document_path: PathBuf, index: u32) -> Self {
        Self {
            document_path,
            index,
            queued_at: Local::now(),
        }
    }
}

/// Creates a new work queue.
///
/// The channel is unbounded; documents queue up while the worker is busy.
pub fn create_work_queue() -> (Sender<ExtractionWorkItem>, Receiver<ExtractionWorkItem>) {
    channel()
}
