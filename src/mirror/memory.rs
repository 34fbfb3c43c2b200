//! In-memory mirror for tests and embedders.
//!
//! Implements the same semantics as the SQLite adapter over a plain `Vec`,
//! keeping the [`SqlMirror`] seam honest without a database file.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::mirror::{ScopeFilter, SqlMirror, UpsertOutcome};
use crate::model::ExchangeRecord;

/// Vec-backed mirror with the trait's atomic-per-call semantics.
#[derive(Debug, Default)]
pub struct MemoryMirror {
    records: Vec<ExchangeRecord>,
}

impl MemoryMirror {
    /// Create an empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn matches_scope(record: &ExchangeRecord, filter: &ScopeFilter) -> bool {
        filter
            .source_system
            .as_deref()
            .map_or(true, |s| record.source_system == s)
            && filter
                .entity_type
                .as_deref()
                .map_or(true, |e| record.entity_type == e)
    }
}

impl SqlMirror for MemoryMirror {
    fn insert(&mut self, record: &ExchangeRecord) -> Result<()> {
        if self
            .records
            .iter()
            .any(|r| r.content_sha256 == record.content_sha256)
        {
            return Err(Error::DuplicateHash {
                hash: record.content_sha256.clone(),
            });
        }
        self.records.push(record.clone());
        Ok(())
    }

    fn upsert(&mut self, record: &ExchangeRecord) -> Result<UpsertOutcome> {
        if self
            .records
            .iter()
            .any(|r| r.content_sha256 == record.content_sha256)
        {
            return Ok(UpsertOutcome::Skipped);
        }

        if let Some(natural_key) = record.natural_key.as_deref() {
            // Update the newest row sharing the natural key, if any.
            let candidate = self
                .records
                .iter_mut()
                .filter(|r| {
                    r.source_system == record.source_system
                        && r.entity_type == record.entity_type
                        && r.natural_key.as_deref() == Some(natural_key)
                })
                .max_by_key(|r| r.observed_at_utc);
            if let Some(existing) = candidate {
                *existing = record.clone();
                return Ok(UpsertOutcome::Updated);
            }
        }

        self.records.push(record.clone());
        Ok(UpsertOutcome::Inserted)
    }

    fn all_hashes(&self, filter: &ScopeFilter) -> Result<HashSet<String>> {
        Ok(self
            .records
            .iter()
            .filter(|r| Self::matches_scope(r, filter))
            .map(|r| r.content_sha256.clone())
            .collect())
    }

    fn records_by_natural_key(
        &self,
        source_system: &str,
        entity_type: &str,
        natural_key: &str,
    ) -> Result<Vec<ExchangeRecord>> {
        let mut records: Vec<ExchangeRecord> = self
            .records
            .iter()
            .filter(|r| {
                r.source_system == source_system
                    && r.entity_type == entity_type
                    && r.natural_key.as_deref() == Some(natural_key)
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| b.observed_at_utc.cmp(&a.observed_at_utc));
        Ok(records)
    }

    fn records_by_scope(&self, filter: &ScopeFilter) -> Result<Vec<ExchangeRecord>> {
        let mut records: Vec<ExchangeRecord> = self
            .records
            .iter()
            .filter(|r| Self::matches_scope(r, filter))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.observed_at_utc.cmp(&a.observed_at_utc));
        Ok(records)
    }

    fn count(&self, filter: &ScopeFilter) -> Result<usize> {
        Ok(self
            .records
            .iter()
            .filter(|r| Self::matches_scope(r, filter))
            .count())
    }
}
