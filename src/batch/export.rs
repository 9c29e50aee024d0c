//! JSON output for extraction results.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::ocr::Extraction;

/// One document's result as emitted on stdout and in JSON files.
#[derive(Debug, Serialize)]
pub struct DocumentReport<'a> {
    pub document: String,
    #[serde(flatten)]
    pub extraction: &'a Extraction,
}

impl<'a> DocumentReport<'a> {
    pub fn new(document: &Path, extraction: &'a Extraction) -> Self {
        Self {
            document: document.display().to_string(),
            extraction,
        }
    }
}

/// Writes `value` as pretty-printed JSON.
pub fn export_to_json<T: Serialize>(value: &T, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result to JSON")?;

    let mut file = File::create(output_path)
        .context(format!("Failed to create JSON file: {}", output_path.display()))?;

    file.write_all(json.as_bytes())
        .context("Failed to write JSON data")?;

    Ok(())
}
