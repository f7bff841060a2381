use anyhow::{anyhow, bail, Context, Result};
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::NamedTempFile;
use wait_timeout::ChildExt;

use super::setup::TesseractPaths;
use super::TextRecognizer;

/// A named set of Tesseract command-line flags.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrProfile {
    pub name: String,
    pub args: Vec<String>,
}

impl OcrProfile {
    /// Builds a profile from a flag string such as `"--oem 3 --psm 6"`.
    pub fn parse(name: impl Into<String>, flags: &str) -> Self {
        Self {
            name: name.into(),
            args: flags.split_whitespace().map(str::to_string).collect(),
        }
    }
}

/// Runs the Tesseract CLI on PNG bytes and returns stdout.
///
/// A run that outlives `timeout` is killed and reported as an error.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    paths: TesseractPaths,
    timeout: Duration,
}

impl TesseractEngine {
    pub fn new(paths: TesseractPaths, timeout: Duration) -> Self {
        Self { paths, timeout }
    }

    fn command(&self, input: &std::path::Path, profile: &OcrProfile) -> Command {
        let mut cmd = Command::new(&self.paths.executable);
        cmd.arg(input).arg("stdout");
        if let Some(tessdata) = &self.paths.tessdata {
            cmd.arg("--tessdata-dir").arg(tessdata);
        }
        cmd.args(["-l", "eng"]).args(&profile.args);
        cmd
    }
}

impl TextRecognizer for TesseractEngine {
    fn read_text(&self, png: &[u8], profile: &OcrProfile) -> Result<String> {
        // Tesseract reads from a path, so stage the bytes in a temp file
        let mut temp_input = NamedTempFile::with_suffix(".png")?;
        temp_input.write_all(png)?;
        temp_input.flush()?;

        let mut child = self
            .command(temp_input.path(), profile)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run {}", self.paths.executable.display()))?;

        // Drain stdout while waiting so a large page can't block on a full pipe
        let stdout = child.stdout.take();
        let reader = std::thread::spawn(move || {
            let mut buffer = Vec::new();
            if let Some(mut stdout) = stdout {
                let _ = stdout.read_to_end(&mut buffer);
            }
            buffer
        });

        let Some(status) = child
            .wait_timeout(self.timeout)
            .context("Failed to wait for Tesseract")?
        else {
            let _ = child.kill();
            let _ = child.wait();
            bail!("Tesseract timed out after {:?} ({})", self.timeout, profile.name);
        };

        let stdout = reader
            .join()
            .map_err(|_| anyhow!("Tesseract output reader panicked"))?;

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(anyhow!("Tesseract failed ({}): {}", profile.name, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&stdout).to_string())
    }
}
