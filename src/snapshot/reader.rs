//! Snapshot pack reader.
//!
//! Opens a dataset directory read-only and exposes lazy iteration plus
//! index-backed lookups. Iteration is restartable: each call to
//! [`SnapshotReader::records`] re-scans the chunk files in sorted order
//! rather than holding a live cursor.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;
use crate::model::{hash_input_key, ExchangeRecord, SnapshotManifest};
use crate::snapshot::file::read_jsonl_lenient;
use crate::snapshot::index::SnapshotIndex;
use crate::snapshot::{INDEX_FILE, MANIFEST_FILE, RECORDS_DIR};

/// Read-only view over one dataset directory.
pub struct SnapshotReader {
    dataset_dir: PathBuf,
    manifest: SnapshotManifest,
    index: SnapshotIndex,
}

impl SnapshotReader {
    /// Open a dataset for reading.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DatasetNotFound`] if `manifest.json` is
    /// absent — there is no implicit dataset creation on read.
    pub fn open(base: &Path, dataset: &str) -> Result<Self> {
        let dataset_dir = base.join(dataset);
        let manifest = SnapshotManifest::load(&dataset_dir.join(MANIFEST_FILE))?;
        let index = SnapshotIndex::load(&dataset_dir.join(INDEX_FILE))?;
        Ok(Self {
            dataset_dir,
            manifest,
            index,
        })
    }

    /// The dataset manifest.
    #[must_use]
    pub fn manifest(&self) -> &SnapshotManifest {
        &self.manifest
    }

    /// The dataset directory.
    #[must_use]
    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    /// Number of distinct content hashes in the pack.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.index.len()
    }

    /// All indexed content hashes.
    #[must_use]
    pub fn hashes(&self) -> HashSet<String> {
        self.index.hashes()
    }

    /// Lazy, finite, restartable iteration over every stored record.
    ///
    /// Chunk files are visited in sorted path order; malformed lines and
    /// unreadable files are logged and skipped.
    #[must_use]
    pub fn records(&self) -> RecordIter {
        let mut files = Vec::new();
        collect_chunk_files(&self.dataset_dir.join(RECORDS_DIR), &mut files);
        files.sort();
        RecordIter {
            files,
            next_file: 0,
            lines: None,
            current_path: PathBuf::new(),
            line_num: 0,
        }
    }

    /// Fetch one record by content hash.
    ///
    /// Resolves the chunk file through the index, then linearly scans that
    /// one file for the exact hash. Returns `Ok(None)` for unknown hashes
    /// or entries that were never flushed.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk file cannot be read.
    pub fn record_by_hash(&self, hash: &str) -> Result<Option<ExchangeRecord>> {
        let Some(entry) = self.index.get(hash) else {
            return Ok(None);
        };
        let Some(file_ref) = entry.file_ref.as_deref() else {
            return Ok(None);
        };
        let records: Vec<ExchangeRecord> =
            read_jsonl_lenient(&self.dataset_dir.join(file_ref))?;
        Ok(records.into_iter().find(|r| r.content_sha256 == hash))
    }

    /// Fetch the stored history of one natural entity, in index insertion
    /// order (one record per distinct hash).
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk file cannot be read.
    pub fn records_by_natural_key(
        &self,
        source_system: &str,
        entity_type: &str,
        natural_key: &str,
    ) -> Result<Vec<ExchangeRecord>> {
        let key = hash_input_key(source_system, entity_type, Some(natural_key));
        let mut records = Vec::new();
        for entry in self.index.entries_for_key(&key) {
            if let Some(record) = self.record_by_hash(&entry.content_sha256)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

fn collect_chunk_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_chunk_files(&path, files);
        } else if path.extension().is_some_and(|e| e == "ndjson") {
            files.push(path);
        }
    }
}

/// Iterator over all records in a pack, file by file, line by line.
pub struct RecordIter {
    files: Vec<PathBuf>,
    next_file: usize,
    lines: Option<Lines<BufReader<File>>>,
    current_path: PathBuf,
    line_num: usize,
}

impl Iterator for RecordIter {
    type Item = ExchangeRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(lines) = self.lines.as_mut() {
                for line_result in lines.by_ref() {
                    self.line_num += 1;
                    let line = match line_result {
                        Ok(line) => line,
                        Err(e) => {
                            warn!(
                                path = %self.current_path.display(),
                                error = %e,
                                "Read error in chunk file, skipping rest of file"
                            );
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ExchangeRecord>(&line) {
                        Ok(record) => return Some(record),
                        Err(e) => {
                            warn!(
                                path = %self.current_path.display(),
                                line = self.line_num,
                                error = %e,
                                "Skipping malformed record line"
                            );
                        }
                    }
                }
                self.lines = None;
            }

            let path = self.files.get(self.next_file)?.clone();
            self.next_file += 1;
            self.line_num = 0;
            match File::open(&path) {
                Ok(file) => {
                    self.current_path = path;
                    self.lines = Some(BufReader::new(file).lines());
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot open chunk file, skipping");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::snapshot::writer::SnapshotWriter;
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

    fn write_dataset(base: &Path, count: u32, chunk_size: usize) -> Vec<String> {
        let mut writer =
            SnapshotWriter::init(base, SnapshotManifest::new("wiki"), chunk_size).unwrap();
        let mut hashes = Vec::new();
        for n in 0..count {
            let record = make_record(n);
            hashes.push(record.content_sha256.clone());
            writer.write(record).unwrap();
        }
        writer.close().unwrap();
        hashes
    }

    #[test]
    fn test_open_missing_dataset_fails() {
        let temp = TempDir::new().unwrap();
        let result = SnapshotReader::open(temp.path(), "missing");
        assert!(matches!(result, Err(Error::DatasetNotFound { .. })));
    }

    #[test]
    fn test_round_trip_hash_set() {
        let temp = TempDir::new().unwrap();
        let written = write_dataset(temp.path(), 5, 2);

        let reader = SnapshotReader::open(temp.path(), "wiki").unwrap();
        let read: HashSet<String> = reader.records().map(|r| r.content_sha256).collect();
        assert_eq!(read, written.into_iter().collect());
        assert_eq!(reader.record_count(), 5);
    }

    #[test]
    fn test_records_is_restartable() {
        let temp = TempDir::new().unwrap();
        write_dataset(temp.path(), 3, 2);

        let reader = SnapshotReader::open(temp.path(), "wiki").unwrap();
        assert_eq!(reader.records().count(), 3);
        assert_eq!(reader.records().count(), 3);
    }

    #[test]
    fn test_record_by_hash() {
        let temp = TempDir::new().unwrap();
        let hashes = write_dataset(temp.path(), 3, 2);

        let reader = SnapshotReader::open(temp.path(), "wiki").unwrap();
        let record = reader.record_by_hash(&hashes[1]).unwrap().unwrap();
        assert_eq!(record.content_sha256, hashes[1]);

        assert!(reader.record_by_hash("0".repeat(64).as_str()).unwrap().is_none());
    }

    #[test]
    fn test_records_by_natural_key() {
        let temp = TempDir::new().unwrap();
        let mut writer =
            SnapshotWriter::init(temp.path(), SnapshotManifest::new("wiki"), 10).unwrap();
        // Two hash-distinct versions of the same page.
        let v1 = ExchangeRecord::new(
            "fetch", "wikipedia", "page", Some("Main"), json!({}), json!({"rev": 1}),
        );
        let v2 = ExchangeRecord::new(
            "fetch", "wikipedia", "page", Some("Main"), json!({}), json!({"rev": 2}),
        );
        writer.write(v1).unwrap();
        writer.write(v2).unwrap();
        writer.write(make_record(9)).unwrap();
        writer.close().unwrap();

        let reader = SnapshotReader::open(temp.path(), "wiki").unwrap();
        let history = reader
            .records_by_natural_key("wikipedia", "page", "Main")
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.natural_key.as_deref() == Some("Main")));
    }

    #[test]
    fn test_malformed_chunk_lines_skipped() {
        let temp = TempDir::new().unwrap();
        write_dataset(temp.path(), 2, 10);

        // Corrupt the chunk file with a garbage line in the middle.
        let reader = SnapshotReader::open(temp.path(), "wiki").unwrap();
        let mut files = Vec::new();
        collect_chunk_files(&reader.dataset_dir().join(RECORDS_DIR), &mut files);
        let chunk = &files[0];
        let mut content = std::fs::read_to_string(chunk).unwrap();
        content.insert_str(content.find('\n').unwrap() + 1, "{{{ not json\n");
        std::fs::write(chunk, content).unwrap();

        assert_eq!(reader.records().count(), 2);
    }
}
