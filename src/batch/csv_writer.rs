//! Append-only CSV of extraction results.
//!
//! Each row holds the batch index, timestamp, document, patient name,
//! completeness flag and the eight measurements. Absent fields are empty cells.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::batch::queue::ExtractionWorkItem;
use crate::biometry::{Eye, EyeMeasurement};
use crate::ocr::Extraction;

const CSV_HEADER: &str =
    "index,timestamp,document,patient,complete,od_al,od_k1,od_k2,od_acd,os_al,os_k1,os_k2,os_acd";

/// Writes the header unless the file already has content.
pub fn init_csv(path: &Path) -> Result<()> {
    if path.exists() {
        let file = File::open(path).context("Failed to open existing CSV")?;
        let reader = BufReader::new(file);
        if reader.lines().next().is_some() {
            return Ok(());
        }
    }

    let mut file = File::create(path).context("Failed to create CSV file")?;
    writeln!(file, "{}", CSV_HEADER).context("Failed to write CSV header")?;
    Ok(())
}

/// Appends one result row. The file is reopened per row so rows written
/// before a crash are kept.
pub fn append_to_csv(path: &Path, work_item: &ExtractionWorkItem, extraction: &Extraction) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open CSV for append")?;

    let mut cells = vec![
        work_item.index.to_string(),
        work_item.queued_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
        escape_field(&work_item.document_path.display().to_string()),
        escape_field(&extraction.patient_name),
        extraction.complete.to_string(),
    ];
    for eye in [Eye::Od, Eye::Os] {
        cells.extend(measurement_cells(extraction.record.eye(eye)));
    }

    writeln!(file, "{}", cells.join(",")).context("Failed to write CSV row")?;
    Ok(())
}

fn measurement_cells(eye: &EyeMeasurement) -> [String; 4] {
    [eye.al, eye.k1(), eye.k2(), eye.acd].map(|value| value.map(|v| v.to_string()).unwrap_or_default())
}

/// Quotes a field containing a comma, quote or line break.
fn escape_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
