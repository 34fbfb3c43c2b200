//! snapmirror - content-addressed snapshot packs with a relational mirror
//!
//! This crate reconciles file-based snapshots of externally-fetched
//! exchange records with a SQL mirror: the same logical record is hashed
//! once, deduplicated deterministically, stored in a human-browsable
//! dataset directory, synchronized bidirectionally with a database, and
//! optionally frozen into an encrypted archive for cold storage.
//!
//! # Architecture
//!
//! - [`canonical`] - Deterministic JSON canonicalization and content hashing
//! - [`model`] - Data types (`ExchangeRecord`, `SnapshotManifest`, policies)
//! - [`snapshot`] - Chunked append-only pack storage with a JSONL index
//! - [`mirror`] - The `SqlMirror` trait, SQLite and in-memory adapters
//! - [`sync`] - Conflict-aware bidirectional sync engine
//! - [`pack`] - Zip archival with optional AES-256-GCM encryption
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod canonical;
pub mod error;
pub mod mirror;
pub mod model;
pub mod pack;
pub mod snapshot;
pub mod sync;

pub use error::{Error, Result};
