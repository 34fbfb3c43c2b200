//! The relational mirror: the SQL counterpart of a snapshot pack.
//!
//! The sync engine depends only on the [`SqlMirror`] trait. Two adapters
//! ship with the crate: [`SqliteMirror`] over rusqlite, and the in-memory
//! [`MemoryMirror`] for tests and embedders that need the seam without a
//! database. Each trait operation is atomic per call; there is no
//! transaction spanning multiple records.

mod memory;
mod schema;
mod sqlite;

pub use memory::MemoryMirror;
pub use schema::TableIdent;
pub use sqlite::SqliteMirror;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::ExchangeRecord;

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No row shared the content hash or natural key; a row was inserted.
    Inserted,
    /// A row with the same natural key but a different hash was updated.
    Updated,
    /// A row with the same content hash already existed; nothing changed.
    Skipped,
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inserted => write!(f, "inserted"),
            Self::Updated => write!(f, "updated"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Optional scoping for hash and count queries.
#[derive(Debug, Clone, Default)]
pub struct ScopeFilter {
    pub source_system: Option<String>,
    pub entity_type: Option<String>,
}

impl ScopeFilter {
    /// No filtering: the whole mirror.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Filter on source system and/or entity type.
    #[must_use]
    pub fn scope(source_system: Option<&str>, entity_type: Option<&str>) -> Self {
        Self {
            source_system: source_system.map(ToString::to_string),
            entity_type: entity_type.map(ToString::to_string),
        }
    }
}

/// Relational storage of exchange records.
///
/// Minimal column contract: `exchange_id`, `exchange_type`,
/// `source_system`, `entity_type`, `natural_key` (nullable),
/// `observed_at_utc`, `content_sha256` (unique), the full serialized
/// payload, and `schema_version`.
pub trait SqlMirror {
    /// Unconditional insert.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DuplicateHash`] when a row with the same
    /// content hash already exists, or a backend error.
    fn insert(&mut self, record: &ExchangeRecord) -> Result<()>;

    /// Insert-or-update keyed on content hash, then natural key.
    ///
    /// Same hash present → `Skipped`. Otherwise, a row with the same
    /// `(source_system, entity_type, natural_key)` → updated in place,
    /// `Updated`. Otherwise inserted, `Inserted`.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the mutation fails.
    fn upsert(&mut self, record: &ExchangeRecord) -> Result<UpsertOutcome>;

    /// All content hashes, optionally scoped.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the query fails.
    fn all_hashes(&self, filter: &ScopeFilter) -> Result<HashSet<String>>;

    /// Every stored version of one natural entity, newest first.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the query fails.
    fn records_by_natural_key(
        &self,
        source_system: &str,
        entity_type: &str,
        natural_key: &str,
    ) -> Result<Vec<ExchangeRecord>>;

    /// All records in a scope, ordered by `observed_at_utc` descending.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the query fails.
    fn records_by_scope(&self, filter: &ScopeFilter) -> Result<Vec<ExchangeRecord>>;

    /// Number of rows, optionally scoped.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the query fails.
    fn count(&self, filter: &ScopeFilter) -> Result<usize>;
}
