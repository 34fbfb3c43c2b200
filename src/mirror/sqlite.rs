//! SQLite adapter for the relational mirror.
//!
//! Each mutation is a single atomic statement; there is no cross-record
//! transaction, matching the sync engine's crash-resume model (re-running
//! an import skips hashes that already landed).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::mirror::schema::{apply_schema, TableIdent};
use crate::mirror::{ScopeFilter, SqlMirror, UpsertOutcome};
use crate::model::ExchangeRecord;

/// SQLite-backed mirror.
#[derive(Debug)]
pub struct SqliteMirror {
    conn: Connection,
    table: TableIdent,
}

impl SqliteMirror {
    /// Open (or create) a mirror database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid or the connection or
    /// schema application fails.
    pub fn open(path: &Path, table_name: &str) -> Result<Self> {
        let table = TableIdent::new(table_name)?;
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        apply_schema(&conn, &table)?;
        Ok(Self { conn, table })
    }

    /// Open an in-memory mirror (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid or the schema fails.
    pub fn open_memory(table_name: &str) -> Result<Self> {
        let table = TableIdent::new(table_name)?;
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn, &table)?;
        Ok(Self { conn, table })
    }

    fn row_to_record(payload: &str) -> rusqlite::Result<ExchangeRecord> {
        serde_json::from_str(payload).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
    }

    fn insert_row(&self, record: &ExchangeRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (exchange_id, exchange_type, source_system, entity_type,
                                     natural_key, observed_at_utc, content_sha256, payload,
                                     schema_version)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    self.table
                ),
                rusqlite::params![
                    record.exchange_id,
                    record.exchange_type,
                    record.source_system,
                    record.entity_type,
                    record.natural_key,
                    record.observed_at_utc.to_rfc3339(),
                    record.content_sha256,
                    payload,
                    record.schema_version,
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Error::DuplicateHash {
                        hash: record.content_sha256.clone(),
                    }
                }
                other => Error::Database(other),
            })?;
        Ok(())
    }

    fn hash_exists(&self, hash: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE content_sha256 = ?1", self.table),
                rusqlite::params![hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Newest row id sharing the natural key, if any.
    fn latest_by_natural_key(
        &self,
        source_system: &str,
        entity_type: &str,
        natural_key: &str,
    ) -> Result<Option<String>> {
        let id: Option<String> = self
            .conn
            .query_row(
                &format!(
                    "SELECT exchange_id FROM {}
                     WHERE source_system = ?1 AND entity_type = ?2 AND natural_key = ?3
                     ORDER BY observed_at_utc DESC LIMIT 1",
                    self.table
                ),
                rusqlite::params![source_system, entity_type, natural_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn scope_clause(filter: &ScopeFilter) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if let Some(source) = &filter.source_system {
            params.push(source.clone());
            clauses.push(format!("source_system = ?{}", params.len()));
        }
        if let Some(entity) = &filter.entity_type {
            params.push(entity.clone());
            clauses.push(format!("entity_type = ?{}", params.len()));
        }
        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (sql, params)
    }
}

impl SqlMirror for SqliteMirror {
    fn insert(&mut self, record: &ExchangeRecord) -> Result<()> {
        self.insert_row(record)
    }

    fn upsert(&mut self, record: &ExchangeRecord) -> Result<UpsertOutcome> {
        if self.hash_exists(&record.content_sha256)? {
            return Ok(UpsertOutcome::Skipped);
        }

        if let Some(natural_key) = record.natural_key.as_deref() {
            if let Some(existing_id) = self.latest_by_natural_key(
                &record.source_system,
                &record.entity_type,
                natural_key,
            )? {
                let payload = serde_json::to_string(record)?;
                self.conn.execute(
                    &format!(
                        "UPDATE {} SET exchange_id = ?1, exchange_type = ?2,
                                       observed_at_utc = ?3, content_sha256 = ?4,
                                       payload = ?5, schema_version = ?6
                         WHERE exchange_id = ?7",
                        self.table
                    ),
                    rusqlite::params![
                        record.exchange_id,
                        record.exchange_type,
                        record.observed_at_utc.to_rfc3339(),
                        record.content_sha256,
                        payload,
                        record.schema_version,
                        existing_id,
                    ],
                )?;
                return Ok(UpsertOutcome::Updated);
            }
        }

        self.insert_row(record)?;
        Ok(UpsertOutcome::Inserted)
    }

    fn all_hashes(&self, filter: &ScopeFilter) -> Result<HashSet<String>> {
        let (clause, params) = Self::scope_clause(filter);
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT content_sha256 FROM {}{clause}", self.table))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| row.get(0))?;
        let mut hashes = HashSet::new();
        for row in rows {
            hashes.insert(row?);
        }
        Ok(hashes)
    }

    fn records_by_natural_key(
        &self,
        source_system: &str,
        entity_type: &str,
        natural_key: &str,
    ) -> Result<Vec<ExchangeRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT payload FROM {}
             WHERE source_system = ?1 AND entity_type = ?2 AND natural_key = ?3
             ORDER BY observed_at_utc DESC",
            self.table
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![source_system, entity_type, natural_key],
            |row| {
                let payload: String = row.get(0)?;
                Self::row_to_record(&payload)
            },
        )?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn records_by_scope(&self, filter: &ScopeFilter) -> Result<Vec<ExchangeRecord>> {
        let (clause, params) = Self::scope_clause(filter);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT payload FROM {}{clause} ORDER BY observed_at_utc DESC",
            self.table
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            let payload: String = row.get(0)?;
            Self::row_to_record(&payload)
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn count(&self, filter: &ScopeFilter) -> Result<usize> {
        let (clause, params) = Self::scope_clause(filter);
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}{clause}", self.table),
            rusqlite::params_from_iter(params),
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
