//! Console + file backend for the `log` facade.
//!
//! Every record is printed to stdout and appended to
//! `<exe_dir>/logs/slcm_cgpa.log` with a millisecond timestamp.

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::paths;

const LOG_FILE_NAME: &str = "slcm_cgpa.log";

/// Environment variable selecting the log level (error, warn, info, debug, trace).
const LOG_LEVEL_ENV: &str = "SLCM_LOG";

struct FileLogger {
    level: LevelFilter,
    file: Mutex<Option<File>>,
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format_line(record.level(), &record.args().to_string());
        print!("{}", line);

        if let Ok(mut guard) = self.file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = file.write_all(line.as_bytes());
            }
        }
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
        if let Ok(mut guard) = self.file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = file.flush();
            }
        }
    }
}

/// Formats one log line: `[HH:MM:SS.mmm] LEVEL message\n`.
fn format_line(level: Level, message: &str) -> String {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    format!("[{}] {:<5} {}\n", timestamp, level, message)
}

/// Parses a level name, falling back to `Info` for anything unknown.
fn parse_level(value: Option<&str>) -> LevelFilter {
    value
        .and_then(|v| v.trim().parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}

fn open_log_file(dir: &Path) -> Option<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
        .ok()
}

/// Installs the logger. Call once at startup, after the logs directory exists.
///
/// If the log file cannot be opened, logging continues on stdout only.
pub fn init() -> anyhow::Result<()> {
    let level = parse_level(std::env::var(LOG_LEVEL_ENV).ok().as_deref());
    let logger = FileLogger {
        level,
        file: Mutex::new(open_log_file(&paths::get_logs_dir())),
    };

    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))?;
    log::set_max_level(level);
    Ok(())
}
