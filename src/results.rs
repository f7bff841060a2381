//! CSV log of extracted CGPA values.
//!
//! One row per successful run, appended so earlier results are never lost.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::extract::ExtractionCandidate;

const CSV_HEADER: &str = "timestamp,cgpa,probe,context";

/// Creates the CSV with a header unless it already has content.
pub fn init_csv(path: &Path) -> Result<()> {
    if path.exists() {
        let file = File::open(path).context("Failed to open existing CSV")?;
        if BufReader::new(file).lines().next().is_some() {
            return Ok(());
        }
    }

    let mut file = File::create(path).context("Failed to create CSV file")?;
    writeln!(file, "{}", CSV_HEADER).context("Failed to write CSV header")?;
    Ok(())
}

/// Commas and line breaks would split the row.
fn sanitize(field: &str) -> String {
    field
        .chars()
        .map(|c| match c {
            ',' | ';' => ' ',
            '\r' | '\n' => ' ',
            other => other,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Appends one result row.
pub fn append_result(path: &Path, at: DateTime<Local>, candidate: &ExtractionCandidate) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open CSV for append")?;

    writeln!(
        file,
        "{},{:.2},{},{}",
        at.format("%Y-%m-%dT%H:%M:%S"),
        candidate.value,
        candidate.probe,
        sanitize(&candidate.context)
    )
    .context("Failed to write CSV row")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ProbeKind;
    use tempfile::tempdir;

    fn candidate(value: f64, context: &str) -> ExtractionCandidate {
        ExtractionCandidate::new(value, ProbeKind::TableScan, context).unwrap()
    }

    #[test]
    fn test_init_csv_creates_header() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("results.csv");

        init_csv(&csv_path).unwrap();

        let content = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(content, format!("{}\n", CSV_HEADER));
    }

    #[test]
    fn test_init_csv_preserves_existing() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("results.csv");
        std::fs::write(&csv_path, "timestamp,cgpa,probe,context\nx,8.00,page_ocr,y\n").unwrap();

        init_csv(&csv_path).unwrap();

        let content = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_append_rows() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("results.csv");
        init_csv(&csv_path).unwrap();

        append_result(&csv_path, Local::now(), &candidate(8.74, "CGPA, overall\n8.74")).unwrap();
        append_result(&csv_path, Local::now(), &candidate(9.1, "CGPA 9.10")).unwrap();

        let content = std::fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with(",8.74,table_scan,CGPA overall 8.74"));
        assert!(lines[2].contains(",9.10,"));
        assert_eq!(lines[1].split(',').count(), 4);
    }
}
