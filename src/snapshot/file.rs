//! File operations for the snapshot pack.
//!
//! - Atomic writes: write to a temp file, fsync, then rename.
//! - NDJSON appends with fsync for durability.
//! - Lenient line-by-line reads: malformed lines are logged and skipped,
//!   never aborting the surrounding read.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;

/// Write content to a file atomically.
///
/// Writes to a sibling `.tmp` file, fsyncs, then renames over the target.
/// If any step fails, the original file (if any) remains untouched.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content.as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Serialize values one-per-line and write them to `path` atomically.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_jsonl<T: Serialize>(path: &Path, values: &[T]) -> Result<()> {
    let mut content = String::new();
    for value in values {
        content.push_str(&serde_json::to_string(value)?);
        content.push('\n');
    }
    atomic_write(path, &content)
}

/// Append values one-per-line to an NDJSON file, fsyncing afterwards.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or written.
pub fn append_jsonl<T: Serialize>(path: &Path, values: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for value in values {
        let line = serde_json::to_string(value)?;
        writeln!(file, "{line}")?;
    }
    file.sync_all()?;

    Ok(())
}

/// Read every parseable value from an NDJSON file.
///
/// Blank lines are ignored. Malformed lines are logged with their line
/// number and skipped — partial corruption of one line never costs the rest
/// of the file.
///
/// # Errors
///
/// Returns an error only if the file itself cannot be opened or read.
pub fn read_jsonl_lenient<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut values = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(value) => values.push(value),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = line_num + 1,
                    error = %e,
                    "Skipping malformed NDJSON line"
                );
            }
        }
    }

    Ok(values)
}
