//! Snapshot pack writer.
//!
//! Appends exchange records to a dataset directory:
//!
//! ```text
//! {base}/{dataset}/
//!   manifest.json
//!   index.jsonl
//!   records/{YYYY}/{YYYY-MM-DD}/chunk-NNNN.ndjson
//! ```
//!
//! Records are buffered in memory and flushed as a chunk once `chunk_size`
//! records accumulate. The chunk's destination directory is chosen from the
//! **first** buffered record's observation date, so one chunk can hold
//! records from several days. `close()` performs the final flush and
//! persists the index and manifest; a `Drop` guard finalizes best-effort if
//! the caller forgot, but only `close()` can report the failure.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{ExchangeRecord, SnapshotManifest};
use crate::snapshot::file::append_jsonl;
use crate::snapshot::index::{IndexEntry, SnapshotIndex};
use crate::snapshot::{INDEX_FILE, MANIFEST_FILE, RECORDS_DIR};

/// Default number of records per chunk file.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Buffered, chunking writer for one dataset.
pub struct SnapshotWriter {
    dataset_dir: PathBuf,
    manifest: SnapshotManifest,
    index: SnapshotIndex,
    buffer: Vec<ExchangeRecord>,
    chunk_size: usize,
    next_chunk: u32,
    closed: bool,
}

impl SnapshotWriter {
    /// Initialize a new dataset under `base` and return a writer for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatasetExists`] if the dataset already has a
    /// manifest, or an I/O error if the directories cannot be created.
    pub fn init(base: &Path, manifest: SnapshotManifest, chunk_size: usize) -> Result<Self> {
        manifest.validate()?;
        let dataset_dir = base.join(&manifest.dataset_name);
        let manifest_path = dataset_dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            return Err(Error::DatasetExists { path: dataset_dir });
        }
        std::fs::create_dir_all(dataset_dir.join(RECORDS_DIR))?;
        manifest.save(&manifest_path)?;
        Ok(Self {
            dataset_dir,
            manifest,
            index: SnapshotIndex::new(),
            buffer: Vec::new(),
            chunk_size: chunk_size.max(1),
            next_chunk: 0,
            closed: false,
        })
    }

    /// Open an existing dataset for appending.
    ///
    /// The chunk counter resumes past the largest `chunk-NNNN` already on
    /// disk, so a fresh writer never overwrites a previous session's chunks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatasetNotFound`] if there is no manifest.
    pub fn open(base: &Path, dataset: &str, chunk_size: usize) -> Result<Self> {
        let dataset_dir = base.join(dataset);
        let manifest = SnapshotManifest::load(&dataset_dir.join(MANIFEST_FILE))?;
        let index = SnapshotIndex::load(&dataset_dir.join(INDEX_FILE))?;
        let next_chunk = max_chunk_number(&dataset_dir.join(RECORDS_DIR)).map_or(0, |n| n + 1);
        Ok(Self {
            dataset_dir,
            manifest,
            index,
            buffer: Vec::new(),
            chunk_size: chunk_size.max(1),
            next_chunk,
            closed: false,
        })
    }

    /// The dataset directory this writer appends to.
    #[must_use]
    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    /// The dataset manifest as currently held in memory.
    #[must_use]
    pub fn manifest(&self) -> &SnapshotManifest {
        &self.manifest
    }

    /// Number of records buffered but not yet flushed.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// True if the hash is already indexed.
    #[must_use]
    pub fn contains_hash(&self, hash: &str) -> bool {
        self.index.contains(hash)
    }

    /// Append a record to the pack.
    ///
    /// Returns whether the content hash was newly indexed. The record is
    /// buffered for physical storage either way: chunk files keep every
    /// observation for provenance, only the index is deduplicated.
    ///
    /// # Errors
    ///
    /// Returns an error if a triggered chunk flush fails.
    pub fn write(&mut self, record: ExchangeRecord) -> Result<bool> {
        let newly_indexed = self.index.add_entry(IndexEntry {
            content_sha256: record.content_sha256.clone(),
            hash_input_key: record.hash_input_key(),
            exchange_id: record.exchange_id.clone(),
            observed_at_utc: record.observed_at_utc,
            file_ref: None,
        });
        if !newly_indexed {
            debug!(hash = %record.content_sha256, "Duplicate hash, storing observation anyway");
        }
        self.buffer.push(record);
        if self.buffer.len() >= self.chunk_size {
            self.flush()?;
        }
        Ok(newly_indexed)
    }

    /// Flush the buffer to a new chunk file.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk cannot be written.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        // Partitioning follows the first buffered record's observation date.
        let first = self.buffer[0].observed_at_utc;
        let rel_path = format!(
            "{RECORDS_DIR}/{}/{}/chunk-{:04}.ndjson",
            first.format("%Y"),
            first.format("%Y-%m-%d"),
            self.next_chunk
        );
        let chunk_path = self.dataset_dir.join(&rel_path);
        append_jsonl(&chunk_path, &self.buffer)?;

        for record in &self.buffer {
            self.index.set_file_ref(&record.content_sha256, &rel_path);
        }
        debug!(chunk = %rel_path, records = self.buffer.len(), "Flushed chunk");

        self.next_chunk += 1;
        self.buffer.clear();
        Ok(())
    }

    /// Flush remaining records and persist the index and manifest.
    ///
    /// Must be called; records still in the buffer are lost if the process
    /// exits without it. The `Drop` guard covers forgotten closes
    /// best-effort but swallows the error into a log line.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or either persist step fails.
    pub fn close(mut self) -> Result<()> {
        self.finalize()
    }

    fn finalize(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.index.save(&self.dataset_dir.join(INDEX_FILE))?;
        self.manifest.bump();
        self.manifest.save(&self.dataset_dir.join(MANIFEST_FILE))?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.finalize() {
                warn!(
                    dataset = %self.dataset_dir.display(),
                    error = %e,
                    "SnapshotWriter dropped without close(); finalization failed"
                );
            }
        }
    }
}

/// Largest `chunk-NNNN` number under the records tree, if any chunk exists.
fn max_chunk_number(records_dir: &Path) -> Option<u32> {
    let mut max = None;
    let mut stack = vec![records_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Some(n) = parse_chunk_number(&path) {
                max = Some(max.map_or(n, |m: u32| m.max(n)));
            }
        }
    }
    max
}

fn parse_chunk_number(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    let middle = name.strip_prefix("chunk-")?.strip_suffix(".ndjson")?;
    middle.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn make_record(n: u32) -> ExchangeRecord {
        ExchangeRecord::new(
            "fetch",
            "wikipedia",
            "page",
            Some(&format!("Page_{n}")),
            json!({"n": n}),
            json!({"status": 200}),
        )
    }

    fn chunk_files(dataset_dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut stack = vec![dataset_dir.join(RECORDS_DIR)];
        while let Some(dir) = stack.pop() {
            if let Ok(entries) = std::fs::read_dir(&dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() {
                        stack.push(path);
                    } else {
                        files.push(path);
                    }
                }
            }
        }
        files.sort();
        files
    }

    #[test]
    fn test_init_creates_manifest() {
        let temp = TempDir::new().unwrap();
        let writer =
            SnapshotWriter::init(temp.path(), SnapshotManifest::new("wiki"), 10).unwrap();
        assert!(temp.path().join("wiki").join(MANIFEST_FILE).exists());
        writer.close().unwrap();
    }

    #[test]
    fn test_init_twice_fails() {
        let temp = TempDir::new().unwrap();
        SnapshotWriter::init(temp.path(), SnapshotManifest::new("wiki"), 10)
            .unwrap()
            .close()
            .unwrap();
        let result = SnapshotWriter::init(temp.path(), SnapshotManifest::new("wiki"), 10);
        assert!(matches!(result, Err(Error::DatasetExists { .. })));
    }

    #[test]
    fn test_three_records_chunk_size_two_yields_two_chunks() {
        let temp = TempDir::new().unwrap();
        let mut writer =
            SnapshotWriter::init(temp.path(), SnapshotManifest::new("wiki"), 2).unwrap();
        for n in 0..3 {
            writer.write(make_record(n)).unwrap();
        }
        writer.close().unwrap();

        let chunks = chunk_files(&temp.path().join("wiki"));
        assert_eq!(chunks.len(), 2, "2 records + 1 record -> 2 chunk files");
    }

    #[test]
    fn test_duplicate_hash_indexed_once_stored_twice() {
        let temp = TempDir::new().unwrap();
        let mut writer =
            SnapshotWriter::init(temp.path(), SnapshotManifest::new("wiki"), 10).unwrap();
        let record = make_record(1);
        let dup = record.clone();
        assert!(writer.write(record).unwrap());
        assert!(!writer.write(dup).unwrap());
        writer.close().unwrap();

        let dataset = temp.path().join("wiki");
        let chunks = chunk_files(&dataset);
        assert_eq!(chunks.len(), 1);
        let content = std::fs::read_to_string(&chunks[0]).unwrap();
        assert_eq!(content.lines().count(), 2, "both observations stored");

        let index = SnapshotIndex::load(&dataset.join(INDEX_FILE)).unwrap();
        assert_eq!(index.len(), 1, "index deduplicated");
    }

    #[test]
    fn test_duplicate_across_chunks_keeps_first_file_ref() {
        let temp = TempDir::new().unwrap();
        let mut writer =
            SnapshotWriter::init(temp.path(), SnapshotManifest::new("wiki"), 1).unwrap();
        let record = make_record(1);
        let hash = record.content_sha256.clone();
        writer.write(record.clone()).unwrap();
        writer.write(record).unwrap();
        writer.close().unwrap();

        let index =
            SnapshotIndex::load(&temp.path().join("wiki").join(INDEX_FILE)).unwrap();
        let file_ref = index.get(&hash).unwrap().file_ref.as_deref().unwrap();
        assert!(
            file_ref.ends_with("chunk-0000.ndjson"),
            "entry must keep pointing at the first observation, got {file_ref}"
        );
    }

    #[test]
    fn test_close_bumps_manifest_version() {
        let temp = TempDir::new().unwrap();
        let mut writer =
            SnapshotWriter::init(temp.path(), SnapshotManifest::new("wiki"), 10).unwrap();
        writer.write(make_record(1)).unwrap();
        writer.close().unwrap();

        let manifest =
            SnapshotManifest::load(&temp.path().join("wiki").join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest.version, 2);
    }

    #[test]
    fn test_drop_without_close_still_persists() {
        let temp = TempDir::new().unwrap();
        {
            let mut writer =
                SnapshotWriter::init(temp.path(), SnapshotManifest::new("wiki"), 10).unwrap();
            writer.write(make_record(1)).unwrap();
            // dropped without close()
        }
        let index = SnapshotIndex::load(&temp.path().join("wiki").join(INDEX_FILE)).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_reopened_writer_resumes_chunk_counter() {
        let temp = TempDir::new().unwrap();
        let mut writer =
            SnapshotWriter::init(temp.path(), SnapshotManifest::new("wiki"), 1).unwrap();
        writer.write(make_record(1)).unwrap();
        writer.close().unwrap();

        let mut writer = SnapshotWriter::open(temp.path(), "wiki", 1).unwrap();
        assert!(writer.contains_hash(&make_record(1).content_sha256));
        writer.write(make_record(2)).unwrap();
        writer.close().unwrap();

        let chunks = chunk_files(&temp.path().join("wiki"));
        assert_eq!(chunks.len(), 2);
        let names: Vec<String> = chunks
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"chunk-0000.ndjson".to_string()));
        assert!(names.contains(&"chunk-0001.ndjson".to_string()));
    }

    #[test]
    fn test_open_missing_dataset_fails() {
        let temp = TempDir::new().unwrap();
        let result = SnapshotWriter::open(temp.path(), "nope", 10);
        assert!(matches!(result, Err(Error::DatasetNotFound { .. })));
    }
}
