//! Error types for snapmirror.
//!
//! One crate-wide error enum with `#[from]` conversions for the underlying
//! I/O, JSON, and database errors, plus domain variants for dataset and
//! encryption failures. Read-side failures (missing manifest, I/O) abort a
//! sync pass; per-record mirror failures are caught by the engine and
//! collected into the sync report instead.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for snapmirror operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in snapmirror operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Dataset not found: no manifest.json in {path}")]
    DatasetNotFound { path: PathBuf },

    #[error("Dataset already initialized at {path}")]
    DatasetExists { path: PathBuf },

    #[error("Invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Duplicate content hash in mirror: {hash}")]
    DuplicateHash { hash: String },

    #[error("Encryption requested but no key is configured ({0})")]
    EncryptionKeyMissing(String),

    #[error("Encryption is not configured for this dataset")]
    EncryptionDisabled,

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{0}")]
    Other(String),
}
