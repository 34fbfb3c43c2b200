//! Mirror schema and identifier validation.
//!
//! The table name comes from the dataset manifest, so it is caller-supplied
//! text. SQL identifiers cannot be bound as parameters; instead the name is
//! validated once at construction into a [`TableIdent`] and only that type
//! ever reaches a query string.

use std::fmt;

use rusqlite::Connection;

use crate::error::{Error, Result};

/// A validated SQL table identifier.
///
/// Accepts ASCII alphanumerics and underscores, not starting with a digit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIdent(String);

impl TableIdent {
    /// Validate and wrap a table name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] for empty names, names starting
    /// with a digit, or names containing anything beyond `[A-Za-z0-9_]`.
    pub fn new(name: &str) -> Result<Self> {
        let valid = !name.is_empty()
            && !name.starts_with(|c: char| c.is_ascii_digit())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(Error::InvalidIdentifier(name.to_string()))
        }
    }

    /// The validated identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Create the mirror table and its indexes if they do not exist.
///
/// Minimal column contract: unique constraint on `content_sha256`, index on
/// `(source_system, entity_type, natural_key)`. Timestamps are stored as
/// RFC 3339 text, the full record as serialized JSON in `payload`.
pub fn apply_schema(conn: &Connection, table: &TableIdent) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            exchange_id     TEXT PRIMARY KEY,
            exchange_type   TEXT NOT NULL,
            source_system   TEXT NOT NULL,
            entity_type     TEXT NOT NULL,
            natural_key     TEXT,
            observed_at_utc TEXT NOT NULL,
            content_sha256  TEXT NOT NULL UNIQUE,
            payload         TEXT NOT NULL,
            schema_version  INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_natural
            ON {table}(source_system, entity_type, natural_key);
        CREATE INDEX IF NOT EXISTS idx_{table}_observed
            ON {table}(observed_at_utc DESC);"
    ))
}
