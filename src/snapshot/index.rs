//! The snapshot index: fast lookup over a pack's record files.
//!
//! Two in-memory maps backed by one JSONL file (`index.jsonl`):
//! `by_hash` is unique per content hash; `by_key` groups the history of one
//! natural entity across hash-distinct versions, in insertion order. The
//! on-disk file uses short field names (`h`, `k`, `id`, `t`, `f`) to keep
//! the index compact; every save is a full rewrite.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::snapshot::file::{read_jsonl_lenient, write_jsonl};

/// One line of `index.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Content hash — the unique key.
    #[serde(rename = "h")]
    pub content_sha256: String,

    /// `source_system|entity_type|natural_key`. Not unique.
    #[serde(rename = "k")]
    pub hash_input_key: String,

    /// Exchange id of the first record observed with this hash.
    #[serde(rename = "id")]
    pub exchange_id: String,

    /// Observation timestamp of that record.
    #[serde(rename = "t")]
    pub observed_at_utc: DateTime<Utc>,

    /// Chunk file path relative to the dataset root. `None` until the
    /// record has been flushed.
    #[serde(rename = "f")]
    pub file_ref: Option<String>,
}

/// In-memory index over a snapshot pack.
#[derive(Debug, Default)]
pub struct SnapshotIndex {
    by_hash: BTreeMap<String, IndexEntry>,
    /// hash_input_key -> content hashes, insertion order preserved.
    by_key: HashMap<String, Vec<String>>,
}

impl SnapshotIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an index from `path`. Malformed lines are skipped; a missing
    /// file yields an empty index.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        let mut index = Self::new();
        if !path.exists() {
            return Ok(index);
        }
        let entries: Vec<IndexEntry> = read_jsonl_lenient(path)?;
        for entry in entries {
            index.add_entry(entry);
        }
        Ok(index)
    }

    /// Add an entry, returning whether the hash was newly indexed.
    ///
    /// A duplicate hash leaves the existing entry untouched and returns
    /// `false`; the caller decides what to do with the physical record.
    pub fn add_entry(&mut self, entry: IndexEntry) -> bool {
        if self.by_hash.contains_key(&entry.content_sha256) {
            return false;
        }
        self.by_key
            .entry(entry.hash_input_key.clone())
            .or_default()
            .push(entry.content_sha256.clone());
        self.by_hash.insert(entry.content_sha256.clone(), entry);
        true
    }

    /// Set the chunk file reference for a flushed record.
    ///
    /// The reference stays pinned to the first flushed occurrence; flushing
    /// a later duplicate observation does not move it.
    pub fn set_file_ref(&mut self, hash: &str, file_ref: &str) {
        if let Some(entry) = self.by_hash.get_mut(hash) {
            if entry.file_ref.is_none() {
                entry.file_ref = Some(file_ref.to_string());
            }
        }
    }

    /// Look up an entry by content hash.
    #[must_use]
    pub fn get(&self, hash: &str) -> Option<&IndexEntry> {
        self.by_hash.get(hash)
    }

    /// True if the hash is indexed.
    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Entries for one natural entity, in insertion order.
    #[must_use]
    pub fn entries_for_key(&self, hash_input_key: &str) -> Vec<&IndexEntry> {
        self.by_key
            .get(hash_input_key)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|h| self.by_hash.get(h))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All indexed content hashes.
    #[must_use]
    pub fn hashes(&self) -> std::collections::HashSet<String> {
        self.by_hash.keys().cloned().collect()
    }

    /// Number of indexed hashes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// True if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Rewrite the full index file from the in-memory map.
    ///
    /// JSONL on disk, but not append-only: every save replaces the file
    /// atomically, in hash order for deterministic output.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let entries: Vec<&IndexEntry> = self.by_hash.values().collect();
        write_jsonl(path, &entries)
    }
}
