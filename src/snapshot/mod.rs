//! The snapshot pack: durable, human-browsable, append-only record storage.
//!
//! A dataset lives in one directory holding `manifest.json`, `index.jsonl`,
//! and chunked NDJSON record files partitioned by observation date. The
//! writer appends and maintains the index; the reader provides lazy
//! iteration and index-backed lookups.

pub mod file;
mod index;
mod reader;
mod writer;

pub use index::{IndexEntry, SnapshotIndex};
pub use reader::{RecordIter, SnapshotReader};
pub use writer::{SnapshotWriter, DEFAULT_CHUNK_SIZE};

/// Manifest filename within a dataset directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Index filename within a dataset directory.
pub const INDEX_FILE: &str = "index.jsonl";

/// Subdirectory holding the chunked record files.
pub const RECORDS_DIR: &str = "records";
