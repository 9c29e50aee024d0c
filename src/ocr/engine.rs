use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
use tempfile::NamedTempFile;

/// Tesseract page segmentation mode: how the engine expects text to be laid
/// out in the region it is given.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSegMode {
    /// Fully automatic layout analysis (3)
    Auto,
    /// A single column of text of variable sizes (4)
    SingleColumn,
    /// A single uniform block of text, paragraph-like (6)
    Block,
    /// A single text line (7)
    SingleLine,
    /// As much text as possible in no particular order (11)
    SparseText,
}

impl PageSegMode {
    pub fn as_arg(self) -> &'static str {
        match self {
            PageSegMode::Auto => "3",
            PageSegMode::SingleColumn => "4",
            PageSegMode::Block => "6",
            PageSegMode::SingleLine => "7",
            PageSegMode::SparseText => "11",
        }
    }
}

impl std::fmt::Display for PageSegMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "psm {}", self.as_arg())
    }
}

/// Per-call recognition settings.
#[derive(Clone, Debug, PartialEq)]
pub struct RecognitionParams {
    /// `+`-joined language hint; recognition accepts every listed script at once
    pub language: String,
    pub psm: PageSegMode,
    /// OCR engine mode
    pub oem: u8,
    /// Restricts recognized characters. Biases toward digits and label letters.
    pub char_whitelist: Option<String>,
}

/// Anything that turns a prepared region into text.
///
/// Garbled or empty output is a success; only a failure to run recognition at
/// all is an error.
pub trait TextRecognizer {
    fn recognize(&self, image: &DynamicImage, params: &RecognitionParams) -> Result<String>;
}

/// Represents a line of OCR text with confidence score
#[derive(Debug, Clone)]
pub struct OcrLine {
    pub text: String,
    pub words: Vec<OcrWord>,
    pub confidence: f32,
}

/// Represents a single word from OCR with confidence score
#[derive(Debug, Clone)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f32,
}

/// Runs the tesseract command-line program.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    pub executable: PathBuf,
    /// `None` lets tesseract use its built-in data directory
    pub tessdata: Option<PathBuf>,
}

impl TesseractCli {
    pub fn new(executable: PathBuf, tessdata: Option<PathBuf>) -> Self {
        Self {
            executable,
            tessdata,
        }
    }

    /// Runs Tesseract with TSV output and returns the structured lines.
    pub fn recognize_lines(
        &self,
        img: &DynamicImage,
        params: &RecognitionParams,
    ) -> Result<Vec<OcrLine>> {
        // Save image to temporary file
        let temp_input = NamedTempFile::with_suffix(".png")?;
        img.save(temp_input.path())
            .context("Failed to write OCR input image")?;

        // Tesseract appends .tsv to the output base
        let temp_output = NamedTempFile::new()?;
        let output_base = temp_output.path().to_string_lossy().to_string();

        let mut command = Command::new(&self.executable);
        command.arg(temp_input.path()).arg(&output_base);
        if let Some(tessdata) = &self.tessdata {
            command.arg("--tessdata-dir").arg(tessdata);
        }
        command
            .arg("-l")
            .arg(&params.language)
            .arg("--oem")
            .arg(params.oem.to_string())
            .arg("--psm")
            .arg(params.psm.as_arg());
        if let Some(whitelist) = &params.char_whitelist {
            command
                .arg("-c")
                .arg(format!("tessedit_char_whitelist={}", whitelist));
        }
        command.arg("tsv");

        let output = command
            .output()
            .with_context(|| format!("Failed to start {}", self.executable.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Tesseract failed: {}", stderr.trim()));
        }

        let tsv_path = format!("{}.tsv", output_base);
        let tsv_content = std::fs::read_to_string(&tsv_path)
            .map_err(|e| anyhow!("Failed to read Tesseract output: {}", e))?;

        let _ = std::fs::remove_file(&tsv_path);

        Ok(parse_tsv_output(&tsv_content))
    }
}

impl TextRecognizer for TesseractCli {
    fn recognize(&self, image: &DynamicImage, params: &RecognitionParams) -> Result<String> {
        let lines = self.recognize_lines(image, params)?;
        log::debug!(
            "Recognized {} lines ({}, mean confidence {:.0}%)",
            lines.len(),
            params.psm,
            mean_confidence(&lines)
        );
        Ok(lines_to_text(&lines))
    }
}

/// Parses Tesseract TSV output into structured OcrLine data.
///
/// Words are grouped by (block, paragraph, line), since tesseract restarts
/// line numbering inside every paragraph.
pub fn parse_tsv_output(tsv: &str) -> Vec<OcrLine> {
    let mut lines: Vec<OcrLine> = Vec::new();
    let mut current_key: Option<(i32, i32, i32)> = None;
    let mut current_words: Vec<OcrWord> = Vec::new();

    // Skip header
    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // TSV fields: level, page_num, block_num, par_num, line_num, word_num,
        //             left, top, width, height, conf, text
        let level: i32 = fields[0].parse().unwrap_or(-1);
        let block_num: i32 = fields[2].parse().unwrap_or(-1);
        let par_num: i32 = fields[3].parse().unwrap_or(-1);
        let line_num: i32 = fields[4].parse().unwrap_or(-1);
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        let text = fields[11].trim();

        // Level 5 = word
        if level != 5 || text.is_empty() {
            continue;
        }

        let key = (block_num, par_num, line_num);
        if current_key.is_some_and(|k| k != key) {
            push_line(&mut lines, std::mem::take(&mut current_words));
        }
        current_key = Some(key);

        current_words.push(OcrWord {
            text: text.to_string(),
            confidence: conf,
        });
    }

    push_line(&mut lines, current_words);
    lines
}

fn push_line(lines: &mut Vec<OcrLine>, words: Vec<OcrWord>) {
    if words.is_empty() {
        return;
    }
    let scored: Vec<f32> = words
        .iter()
        .map(|w| w.confidence)
        .filter(|&c| c >= 0.0)
        .collect();
    let confidence = if scored.is_empty() {
        0.0
    } else {
        scored.iter().sum::<f32>() / scored.len() as f32
    };
    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    lines.push(OcrLine {
        text,
        words,
        confidence,
    });
}

/// Joins recognized lines into one string with embedded line breaks.
pub fn lines_to_text(lines: &[OcrLine]) -> String {
    lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn mean_confidence(lines: &[OcrLine]) -> f32 {
    if lines.is_empty() {
        return 0.0;
    }
    lines.iter().map(|l| l.confidence).sum::<f32>() / lines.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn word(block: i32, par: i32, line: i32, conf: f32, text: &str) -> String {
        format!("5\t1\t{block}\t{par}\t{line}\t1\t0\t0\t10\t10\t{conf}\t{text}")
    }

    #[test]
    fn test_parse_tsv_groups_words_into_lines() {
        let tsv = [
            HEADER.to_string(),
            "1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t".to_string(),
            word(1, 1, 1, 90.0, "Comp."),
            word(1, 1, 1, 80.0, "AL:"),
            word(1, 1, 1, 70.0, "24.05"),
            word(1, 1, 2, 95.0, "ACD:"),
            word(1, 1, 2, 85.0, "3.15mm"),
        ]
        .join("\n");

        let lines = parse_tsv_output(&tsv);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Comp. AL: 24.05");
        assert_eq!(lines[0].words.len(), 3);
        assert!((lines[0].confidence - 80.0).abs() < 0.01);
        assert_eq!(lines[1].text, "ACD: 3.15mm");
        assert_eq!(lines_to_text(&lines), "Comp. AL: 24.05\nACD: 3.15mm");
    }

    #[test]
    fn test_parse_tsv_separates_paragraphs_with_same_line_number() {
        let tsv = [
            HEADER.to_string(),
            word(1, 1, 1, 90.0, "OD"),
            word(1, 2, 1, 90.0, "MV:"),
            word(2, 1, 1, 90.0, "OS"),
        ]
        .join("\n");

        let lines = parse_tsv_output(&tsv);
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["OD", "MV:", "OS"]);
    }

    #[test]
    fn test_parse_tsv_empty_output() {
        assert!(parse_tsv_output(HEADER).is_empty());
        assert!(parse_tsv_output("").is_empty());
        assert_eq!(lines_to_text(&[]), "");
    }

    #[test]
    fn test_psm_args() {
        assert_eq!(PageSegMode::Block.as_arg(), "6");
        assert_eq!(PageSegMode::SparseText.as_arg(), "11");
        assert_eq!(PageSegMode::SingleColumn.to_string(), "psm 4");
    }
}
