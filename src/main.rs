//! Biometry OCR
//!
//! Reads scanned optical biometry reports (PDF or image) and extracts axial
//! length, keratometry and anterior chamber depth for each eye.

mod batch;
mod biometry;
mod config;
mod document;
mod error;
mod logging;
mod ocr;
mod paths;

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::thread;

use batch::csv_writer::{append_to_csv, init_csv};
use batch::export::{export_to_json, DocumentReport};
use batch::queue::{create_work_queue, ExtractionWorkItem};
use batch::worker::{process_document, run_extraction_worker};
use config::ExtractionConfig;
use ocr::{ensure_tesseract, BiometryExtractor, EyeSide, TextRecognizer};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EyeSideArg {
    LeftIsOd,
    LeftIsOs,
}

impl From<EyeSideArg> for EyeSide {
    fn from(arg: EyeSideArg) -> Self {
        match arg {
            EyeSideArg::LeftIsOd => EyeSide::LeftIsOd,
            EyeSideArg::LeftIsOs => EyeSide::LeftIsOs,
        }
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "Extract AL, K1/K2 and ACD per eye from biometry reports", long_about = None)]
struct Cli {
    /// PDF or image files to process
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Configuration file (defaults to config.json next to the executable)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Which page half holds the right eye
    #[arg(long, value_enum)]
    eye_side: Option<EyeSideArg>,

    /// Tesseract language hint, e.g. "por+eng"
    #[arg(long)]
    lang: Option<String>,

    /// Append one row per document to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Write the result as JSON to this file (single input only)
    #[arg(long)]
    json_out: Option<PathBuf>,

    /// Log debug output, including recognized text
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("PANIC: {}", panic_info);
    }));

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(paths::get_default_config_path);
    let mut config = ExtractionConfig::load(&config_path);
    apply_overrides(&mut config, &cli);

    let tesseract = ensure_tesseract(&config.ocr)?;
    let extractor = BiometryExtractor::new(tesseract, config)?;

    if let [input] = cli.inputs.as_slice() {
        run_single(&extractor, input, cli.json_out.as_deref(), cli.csv.as_deref())
    } else {
        if cli.json_out.is_some() {
            log::warn!("--json-out is ignored with more than one input");
        }
        run_batch(extractor, cli.inputs, cli.csv)
    }
}

/// Command-line flags take precedence over config.json.
fn apply_overrides(config: &mut ExtractionConfig, cli: &Cli) {
    if let Some(side) = cli.eye_side {
        config.segmentation.eye_side = side.into();
    }
    if let Some(lang) = &cli.lang {
        config.ocr.language = lang.clone();
    }
}

fn run_single<R: TextRecognizer>(
    extractor: &BiometryExtractor<R>,
    input: &Path,
    json_out: Option<&Path>,
    csv: Option<&Path>,
) -> Result<()> {
    let extraction = process_document(extractor, input)?;
    let report = DocumentReport::new(input, &extraction);

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(path) = json_out {
        export_to_json(&report, path)?;
        log::info!("Result written to {}", path.display());
    }

    if let Some(path) = csv {
        init_csv(path)?;
        append_to_csv(path, &ExtractionWorkItem::new(input.to_path_buf(), 1), &extraction)?;
    }

    if !extraction.complete {
        log::warn!("{}: extraction incomplete", input.display());
    }
    Ok(())
}

fn run_batch<R: TextRecognizer + Send + 'static>(
    extractor: BiometryExtractor<R>,
    inputs: Vec<PathBuf>,
    csv: Option<PathBuf>,
) -> Result<()> {
    let (sender, receiver) = create_work_queue();
    let worker = thread::spawn(move || run_extraction_worker(receiver, extractor, csv));

    for (i, path) in inputs.into_iter().enumerate() {
        sender.send(ExtractionWorkItem::new(path, i as u32 + 1))?;
    }
    drop(sender);

    let summary = worker
        .join()
        .map_err(|_| anyhow!("Extraction worker panicked"))?;

    if summary.processed == 0 {
        return Err(anyhow!("No document could be processed"));
    }
    Ok(())
}
