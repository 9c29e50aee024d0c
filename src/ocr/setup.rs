use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::OcrConfig;
use crate::paths;

use super::engine::TesseractCli;

const TESSDATA_REPO: &str = "https://github.com/tesseract-ocr/tessdata/raw/main";

const COMMON_EXECUTABLES: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
    "/usr/bin/tesseract",
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
];

const SYSTEM_TESSDATA_DIRS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tessdata",
    r"C:\Program Files (x86)\Tesseract-OCR\tessdata",
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
    "/opt/homebrew/share/tessdata",
];

/// Finds tesseract and makes sure every language in the hint is usable.
///
/// When the system installation already has all of them, tesseract runs with
/// its own data directory. Otherwise a local tessdata directory is filled
/// (copied from a system directory where possible, downloaded otherwise) and
/// passed with `--tessdata-dir`.
pub fn ensure_tesseract(config: &OcrConfig) -> Result<TesseractCli> {
    let executable = find_tesseract_executable(config.tesseract_path.as_deref())?;
    log::info!("Using tesseract at {}", executable.display());

    let wanted = split_languages(&config.language);
    if wanted.is_empty() {
        return Err(anyhow!("No OCR language configured"));
    }

    let installed = list_installed_languages(&executable).unwrap_or_else(|e| {
        log::warn!("Could not list tesseract languages: {:#}", e);
        Vec::new()
    });
    let missing: Vec<&str> = wanted
        .iter()
        .copied()
        .filter(|lang| !installed.iter().any(|l| l == lang))
        .collect();

    if missing.is_empty() {
        return Ok(TesseractCli::new(executable, None));
    }

    log::info!("Missing tesseract languages: {}", missing.join(", "));

    let tessdata = paths::get_tessdata_dir();
    fs::create_dir_all(&tessdata)
        .with_context(|| format!("Failed to create {}", tessdata.display()))?;

    // The local directory replaces the system one, so it needs every language
    for lang in &wanted {
        let target = tessdata.join(traineddata_file(lang));
        if target.exists() {
            continue;
        }
        if let Some(system_copy) = find_system_traineddata(lang) {
            log::info!("Copying {} from {}", traineddata_file(lang), system_copy.display());
            fs::copy(&system_copy, &target)?;
        } else {
            download_traineddata(lang, &tessdata)?;
        }
    }

    log::info!("Tesseract data ready at {}", tessdata.display());
    Ok(TesseractCli::new(executable, Some(tessdata)))
}

/// Finds the tesseract executable: configured path, then `PATH`, then common
/// install locations.
pub fn find_tesseract_executable(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = configured {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
        log::warn!("Configured tesseract path {} does not exist", path);
    }

    // Check PATH
    if let Ok(output) = Command::new("tesseract").arg("--version").output() {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    for path in COMMON_EXECUTABLES {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "Tesseract not found. Install Tesseract-OCR and add it to PATH, \
         or set ocr.tesseract_path in config.json"
    ))
}

/// Runs `tesseract --list-langs`.
fn list_installed_languages(executable: &Path) -> Result<Vec<String>> {
    let output = Command::new(executable)
        .arg("--list-langs")
        .output()
        .with_context(|| format!("Failed to start {}", executable.display()))?;

    // Older releases print the list on stderr
    let mut listing = String::from_utf8_lossy(&output.stdout).into_owned();
    listing.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(parse_language_list(&listing))
}

/// Parses `--list-langs` output, skipping the "List of available languages"
/// heading.
pub fn parse_language_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of available languages"))
        .filter(|line| !line.contains(' '))
        .map(str::to_string)
        .collect()
}

/// Splits a `+`-joined language hint.
pub fn split_languages(hint: &str) -> Vec<&str> {
    hint.split('+')
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .collect()
}

fn traineddata_file(lang: &str) -> String {
    format!("{}.traineddata", lang)
}

fn find_system_traineddata(lang: &str) -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        let prefix = PathBuf::from(prefix);
        dirs.push(prefix.join("tessdata"));
        dirs.push(prefix);
    }
    dirs.extend(SYSTEM_TESSDATA_DIRS.iter().map(PathBuf::from));

    dirs.into_iter()
        .map(|dir| dir.join(traineddata_file(lang)))
        .find(|path| path.exists())
}

fn download_traineddata(lang: &str, tessdata_dir: &Path) -> Result<()> {
    let url = format!("{}/{}", TESSDATA_REPO, traineddata_file(lang));
    let target = tessdata_dir.join(traineddata_file(lang));

    log::info!("Downloading {}...", traineddata_file(lang));

    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let response = client
        .get(&url)
        .header("User-Agent", "biometry-ocr")
        .send()
        .with_context(|| format!("Failed to download {}", url))?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Failed to download {}: HTTP {}",
            traineddata_file(lang),
            response.status()
        ));
    }

    let bytes = response.bytes()?;
    write_atomically(&target, &bytes)?;

    log::info!("Downloaded {} ({} bytes)", traineddata_file(lang), bytes.len());

    Ok(())
}

/// Writes `bytes` to a temporary file beside `target` and renames it into
/// place, so an interrupted write never leaves a partial `target`.
fn write_atomically(target: &Path, bytes: &[u8]) -> Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| anyhow!("No parent directory for {}", target.display()))?;
    let mut file = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create a temporary file in {}", dir.display()))?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(target)
        .with_context(|| format!("Failed to move download into {}", target.display()))?;
    Ok(())
}
