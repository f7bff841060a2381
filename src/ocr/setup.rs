use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::OcrConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct TesseractPaths {
    pub executable: PathBuf,
    /// None means Tesseract's compiled-in default
    pub tessdata: Option<PathBuf>,
}

fn executable_name() -> &'static str {
    if cfg!(windows) { "tesseract.exe" } else { "tesseract" }
}

const COMMON_PATHS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
    "/usr/bin/tesseract",
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
];

/// Returns the per-user directory that may hold a private Tesseract copy
pub fn get_tesseract_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("slcm-cgpa")
        .join("tesseract")
}

/// Finds a working Tesseract install.
///
/// Order: configured path, the per-user directory, PATH, common install
/// locations. The first candidate that exists wins; nothing is downloaded.
pub fn locate_tesseract(config: &OcrConfig) -> Result<TesseractPaths> {
    let executable = find_tesseract_executable(config.tesseract_path.as_deref())?;
    let tessdata = find_tessdata_dir(&executable);

    log::info!("Tesseract found at: {}", executable.display());
    if let Some(dir) = &tessdata {
        log::debug!("Using tessdata at: {}", dir.display());
    }

    Ok(TesseractPaths {
        executable,
        tessdata,
    })
}

fn find_tesseract_executable(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = configured {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
        log::warn!("Configured tesseract_path {} does not exist, searching instead", path);
    }

    let local_exe = get_tesseract_dir().join(executable_name());
    if local_exe.exists() {
        return Ok(local_exe);
    }

    if responds_to_version("tesseract") {
        return Ok(PathBuf::from("tesseract"));
    }

    for path in COMMON_PATHS {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "Tesseract not found. Install Tesseract-OCR, add it to PATH, or set tesseract_path in config.json"
    ))
}

fn responds_to_version(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Picks a tessdata directory containing eng.traineddata, if one is known.
fn find_tessdata_dir(executable: &Path) -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        let prefix = PathBuf::from(prefix);
        candidates.push(prefix.join("tessdata"));
        candidates.push(prefix);
    }
    candidates.push(get_tesseract_dir().join("tessdata"));
    if let Some(parent) = executable.parent() {
        candidates.push(parent.join("tessdata"));
    }

    first_with_eng_data(candidates)
}

fn first_with_eng_data(candidates: Vec<PathBuf>) -> Option<PathBuf> {
    candidates
        .into_iter()
        .find(|dir| dir.join("eng.traineddata").exists())
}
