//! The sync engine.
//!
//! Hash-diff based reconciliation: a record whose content hash exists on
//! the other side is already synced and gets skipped without comparing
//! payloads. Only hash-absent records are considered for transfer, and only
//! natural-key collisions go through conflict resolution.
//!
//! Error discipline: failure to open the pack or reach the mirror aborts
//! the invocation; a failure on an individual record is recorded in the
//! report and the batch continues.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::mirror::{ScopeFilter, SqlMirror, UpsertOutcome};
use crate::model::{ExchangeRecord, SnapshotManifest};
use crate::snapshot::{SnapshotReader, SnapshotWriter, DEFAULT_CHUNK_SIZE, MANIFEST_FILE};
use crate::sync::report::{
    resolve_conflict, ConflictInfo, ConflictResolution, ConflictStrategy, SyncDirection,
    SyncReport, SyncState,
};

/// Reconciles one dataset with one mirror.
///
/// The engine borrows the mirror for its lifetime, so callers keep access
/// to it between invocations. State is per invocation: each call walks
/// `Scanning` through `Importing`/`Exporting` to a terminal state, which is
/// also recorded in the returned report.
pub struct SyncEngine<'a, M: SqlMirror> {
    base: PathBuf,
    dataset: String,
    chunk_size: usize,
    mirror: &'a mut M,
    state: SyncState,
}

impl<'a, M: SqlMirror> SyncEngine<'a, M> {
    /// Create an engine for the dataset under `base`.
    pub fn new(base: &Path, dataset: &str, mirror: &'a mut M) -> Self {
        Self {
            base: base.to_path_buf(),
            dataset: dataset.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            mirror,
            state: SyncState::Idle,
        }
    }

    /// Override the chunk size used when the export pass appends to the pack.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Engine state as of the last invocation.
    #[must_use]
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Run a sync pass in the given direction.
    ///
    /// `None` arguments fall back to the dataset manifest's sync policy.
    /// `Bidirectional` imports first, then exports, and merges the two
    /// reports.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset cannot be opened or the mirror
    /// cannot be queried; per-record failures land in the report instead.
    pub fn sync(
        &mut self,
        direction: Option<SyncDirection>,
        dry_run: bool,
        strategy: Option<ConflictStrategy>,
    ) -> Result<SyncReport> {
        let manifest =
            SnapshotManifest::load(&self.base.join(&self.dataset).join(MANIFEST_FILE))?;
        let direction = direction.unwrap_or(manifest.sync_policy.direction_default);
        let strategy = strategy.unwrap_or(manifest.sync_policy.conflict_strategy);
        info!(
            dataset = %self.dataset,
            direction = %direction,
            dry_run,
            "Starting sync"
        );

        match direction {
            SyncDirection::JsonToSql => self.import_json_to_sql(dry_run, Some(strategy)),
            SyncDirection::SqlToJson => self.export_sql_to_json(dry_run),
            SyncDirection::Bidirectional => {
                let mut report =
                    SyncReport::new(SyncDirection::Bidirectional, strategy, dry_run);
                report.merge(self.import_json_to_sql(dry_run, Some(strategy))?);
                report.merge(self.export_sql_to_json(dry_run)?);
                self.state = report.state;
                Ok(report)
            }
        }
    }

    /// Import pack records the mirror does not have.
    ///
    /// Every pack record whose hash the mirror lacks is upserted; a
    /// natural-key collision with a different hash is resolved by
    /// `strategy` first. On a dry run nothing is written and the counts
    /// are estimates of what a real run would do.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset cannot be opened or the mirror's
    /// hash set cannot be fetched. Individual record failures are appended
    /// to `report.errors` and the pass continues.
    pub fn import_json_to_sql(
        &mut self,
        dry_run: bool,
        strategy: Option<ConflictStrategy>,
    ) -> Result<SyncReport> {
        self.state = SyncState::Scanning;
        let reader = SnapshotReader::open(&self.base, &self.dataset)?;
        let strategy = strategy.unwrap_or(reader.manifest().sync_policy.conflict_strategy);
        // The diff runs against every mirror hash, not just the manifest
        // scope: a pack record already mirrored outside the dataset's
        // declared scope is a skip, never a conflict with itself.
        let mut mirror_hashes = self.mirror.all_hashes(&ScopeFilter::any())?;
        let mut report = SyncReport::new(SyncDirection::JsonToSql, strategy, dry_run);

        self.state = SyncState::Importing;
        for record in reader.records() {
            report.json_records_scanned += 1;

            if mirror_hashes.contains(&record.content_sha256) {
                report.json_to_sql_skipped += 1;
                continue;
            }

            let conflicting = match self.lookup_conflicting(&record) {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(hash = %record.content_sha256, error = %e, "Mirror lookup failed");
                    report.errors.push(format!(
                        "lookup failed for {}: {e}",
                        record.content_sha256
                    ));
                    continue;
                }
            };

            if let Some(sql_record) = conflicting {
                let resolution = resolve_conflict(
                    strategy,
                    Some(record.observed_at_utc),
                    Some(sql_record.observed_at_utc),
                );
                report.conflicts.push(ConflictInfo {
                    source_system: record.source_system.clone(),
                    entity_type: record.entity_type.clone(),
                    natural_key: record.natural_key.clone().unwrap_or_default(),
                    json_hash: record.content_sha256.clone(),
                    sql_hash: sql_record.content_sha256.clone(),
                    json_observed_at: Some(record.observed_at_utc),
                    sql_observed_at: Some(sql_record.observed_at_utc),
                    resolution,
                });
                match resolution {
                    ConflictResolution::JsonWins => {
                        self.apply_import(
                            &record,
                            dry_run,
                            UpsertOutcome::Updated,
                            &mut report,
                            &mut mirror_hashes,
                        );
                    }
                    ConflictResolution::SqlWins => {
                        debug!(
                            key = record.natural_key.as_deref().unwrap_or(""),
                            "Mirror version wins, skipping"
                        );
                        report.json_to_sql_skipped += 1;
                    }
                    ConflictResolution::Failed => {
                        report.errors.push(format!(
                            "conflict on {}/{}/{}: pack {} vs mirror {}",
                            record.source_system,
                            record.entity_type,
                            record.natural_key.as_deref().unwrap_or(""),
                            record.content_sha256,
                            sql_record.content_sha256,
                        ));
                    }
                }
            } else {
                self.apply_import(
                    &record,
                    dry_run,
                    UpsertOutcome::Inserted,
                    &mut report,
                    &mut mirror_hashes,
                );
            }
        }

        report.complete();
        self.state = report.state;
        info!(
            dataset = %self.dataset,
            scanned = report.json_records_scanned,
            inserted = report.json_to_sql_inserted,
            updated = report.json_to_sql_updated,
            skipped = report.json_to_sql_skipped,
            conflicts = report.conflicts.len(),
            errors = report.errors.len(),
            dry_run,
            "Import pass finished"
        );
        Ok(report)
    }

    /// Export mirror rows the pack does not have.
    ///
    /// Missing rows are appended to the pack through a writer that is only
    /// opened once the first missing row is found, so a dry run (or an
    /// already-converged pair) leaves the dataset directory untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset cannot be opened, the mirror cannot
    /// be queried, or the writer fails to close. Individual write failures
    /// are appended to `report.errors` and the pass continues.
    pub fn export_sql_to_json(&mut self, dry_run: bool) -> Result<SyncReport> {
        self.state = SyncState::Scanning;
        let reader = SnapshotReader::open(&self.base, &self.dataset)?;
        let manifest = reader.manifest();
        let strategy = manifest.sync_policy.conflict_strategy;
        let filter = ScopeFilter::scope(
            manifest.source_system.as_deref(),
            manifest.entity_type.as_deref(),
        );
        let mut pack_hashes = reader.hashes();
        let sql_records = self.mirror.records_by_scope(&filter)?;

        let mut report = SyncReport::new(SyncDirection::SqlToJson, strategy, dry_run);
        // The export pass diffs against the index, so its pack-side scan
        // count is distinct indexed hashes, not physical records.
        report.json_records_scanned = pack_hashes.len();
        report.sql_records_scanned = sql_records.len();
        drop(reader);

        self.state = SyncState::Exporting;
        let mut writer: Option<SnapshotWriter> = None;
        for record in sql_records {
            if pack_hashes.contains(&record.content_sha256) {
                continue;
            }
            pack_hashes.insert(record.content_sha256.clone());
            if dry_run {
                report.sql_to_json_inserted += 1;
                continue;
            }
            if writer.is_none() {
                // Failing to open the pack for writing is structural, not
                // per-record: abort the pass.
                writer = Some(SnapshotWriter::open(
                    &self.base,
                    &self.dataset,
                    self.chunk_size,
                )?);
            }
            let hash = record.content_sha256.clone();
            if let Some(w) = writer.as_mut() {
                match w.write(record) {
                    Ok(_) => report.sql_to_json_inserted += 1,
                    Err(e) => {
                        warn!(hash = %hash, error = %e, "Pack append failed");
                        report.errors.push(format!("append failed for {hash}: {e}"));
                    }
                }
            }
        }
        if let Some(w) = writer {
            w.close()?;
        }

        report.complete();
        self.state = report.state;
        info!(
            dataset = %self.dataset,
            sql_scanned = report.sql_records_scanned,
            exported = report.sql_to_json_inserted,
            errors = report.errors.len(),
            dry_run,
            "Export pass finished"
        );
        Ok(report)
    }

    /// The mirror's newest record sharing this record's natural key with a
    /// different content hash, if any.
    fn lookup_conflicting(&self, record: &ExchangeRecord) -> Result<Option<ExchangeRecord>> {
        let Some(natural_key) = record.natural_key.as_deref() else {
            return Ok(None);
        };
        let existing = self.mirror.records_by_natural_key(
            &record.source_system,
            &record.entity_type,
            natural_key,
        )?;
        // Newest first; same-hash rows were already filtered by the hash diff.
        Ok(existing.into_iter().next())
    }

    fn apply_import(
        &mut self,
        record: &ExchangeRecord,
        dry_run: bool,
        estimated: UpsertOutcome,
        report: &mut SyncReport,
        mirror_hashes: &mut std::collections::HashSet<String>,
    ) {
        let outcome = if dry_run {
            Ok(estimated)
        } else {
            self.mirror.upsert(record)
        };
        match outcome {
            Ok(UpsertOutcome::Inserted) => report.json_to_sql_inserted += 1,
            Ok(UpsertOutcome::Updated) => report.json_to_sql_updated += 1,
            Ok(UpsertOutcome::Skipped) => report.json_to_sql_skipped += 1,
            Err(e) => {
                warn!(hash = %record.content_sha256, error = %e, "Mirror upsert failed");
                report
                    .errors
                    .push(format!("upsert failed for {}: {e}", record.content_sha256));
                return;
            }
        }
        // Duplicate observations later in the same pass diff as skips.
        mirror_hashes.insert(record.content_sha256.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::MemoryMirror;
    use chrono::{TimeZone, Utc};
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

    fn versioned(key: &str, rev: u32, year: i32, month: u32) -> ExchangeRecord {
        ExchangeRecord::new(
            "fetch",
            "wikipedia",
            "page",
            Some(key),
            json!({}),
            json!({"rev": rev}),
        )
        .with_observed_at(Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap())
    }

    fn write_dataset(base: &Path, records: Vec<ExchangeRecord>) {
        let mut writer =
            SnapshotWriter::init(base, SnapshotManifest::new("wiki"), 100).unwrap();
        for record in records {
            writer.write(record).unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn test_import_then_reimport_is_idempotent() {
        let temp = TempDir::new().unwrap();
        write_dataset(temp.path(), (0..3).map(make_record).collect());
        let mut mirror = MemoryMirror::new();

        let mut engine = SyncEngine::new(temp.path(), "wiki", &mut mirror);
        let first = engine.import_json_to_sql(false, None).unwrap();
        assert_eq!(first.json_to_sql_inserted, 3);
        assert_eq!(first.json_to_sql_skipped, 0);
        assert_eq!(first.state, SyncState::Completed);

        let second = engine.import_json_to_sql(false, None).unwrap();
        assert_eq!(second.json_to_sql_inserted, 0);
        assert_eq!(second.json_to_sql_skipped, 3);
        assert!(second.conflicts.is_empty());

        assert_eq!(mirror.count(&ScopeFilter::any()).unwrap(), 3);
    }

    #[test]
    fn test_import_dry_run_writes_nothing_but_estimates() {
        let temp = TempDir::new().unwrap();
        write_dataset(temp.path(), (0..3).map(make_record).collect());
        let mut mirror = MemoryMirror::new();

        let report = SyncEngine::new(temp.path(), "wiki", &mut mirror)
            .import_json_to_sql(true, None)
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.json_to_sql_inserted, 3);
        assert_eq!(mirror.count(&ScopeFilter::any()).unwrap(), 0);
    }

    #[test]
    fn test_prefer_newest_json_side_wins() {
        let temp = TempDir::new().unwrap();
        write_dataset(temp.path(), vec![versioned("Main", 2, 2024, 6)]);
        let mut mirror = MemoryMirror::new();
        mirror.insert(&versioned("Main", 1, 2024, 1)).unwrap();

        let report = SyncEngine::new(temp.path(), "wiki", &mut mirror)
            .import_json_to_sql(false, Some(ConflictStrategy::PreferNewest))
            .unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].resolution, ConflictResolution::JsonWins);
        assert_eq!(report.json_to_sql_updated, 1);

        let rows = mirror
            .records_by_natural_key("wikipedia", "page", "Main")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].response["rev"], 2);
    }

    #[test]
    fn test_prefer_newest_sql_side_wins() {
        let temp = TempDir::new().unwrap();
        write_dataset(temp.path(), vec![versioned("Main", 1, 2024, 1)]);
        let mut mirror = MemoryMirror::new();
        mirror.insert(&versioned("Main", 2, 2024, 6)).unwrap();

        let report = SyncEngine::new(temp.path(), "wiki", &mut mirror)
            .import_json_to_sql(false, Some(ConflictStrategy::PreferNewest))
            .unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].resolution, ConflictResolution::SqlWins);
        assert_eq!(report.json_to_sql_skipped, 1);

        let rows = mirror
            .records_by_natural_key("wikipedia", "page", "Main")
            .unwrap();
        assert_eq!(rows[0].response["rev"], 2);
    }

    #[test]
    fn test_fail_strategy_records_error_and_continues() {
        let temp = TempDir::new().unwrap();
        write_dataset(
            temp.path(),
            vec![versioned("Main", 2, 2024, 6), make_record(7)],
        );
        let mut mirror = MemoryMirror::new();
        mirror.insert(&versioned("Main", 1, 2024, 1)).unwrap();

        let report = SyncEngine::new(temp.path(), "wiki", &mut mirror)
            .import_json_to_sql(false, Some(ConflictStrategy::Fail))
            .unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.state, SyncState::CompletedWithErrors);
        // The non-conflicting record still made it across.
        assert_eq!(report.json_to_sql_inserted, 1);
        assert!(!report.is_success());
    }

    #[test]
    fn test_export_appends_missing_rows() {
        let temp = TempDir::new().unwrap();
        write_dataset(temp.path(), vec![make_record(0)]);
        let mut mirror = MemoryMirror::new();
        for n in 0..3 {
            mirror.insert(&make_record(n)).unwrap();
        }

        let report = SyncEngine::new(temp.path(), "wiki", &mut mirror)
            .export_sql_to_json(false)
            .unwrap();
        assert_eq!(report.sql_records_scanned, 3);
        assert_eq!(report.sql_to_json_inserted, 2);

        let reader = SnapshotReader::open(temp.path(), "wiki").unwrap();
        assert_eq!(reader.record_count(), 3);
    }

    #[test]
    fn test_export_dry_run_leaves_pack_untouched() {
        let temp = TempDir::new().unwrap();
        write_dataset(temp.path(), Vec::new());
        let manifest_before = std::fs::read_to_string(
            temp.path().join("wiki").join(MANIFEST_FILE),
        )
        .unwrap();
        let mut mirror = MemoryMirror::new();
        for n in 0..5 {
            mirror.insert(&make_record(n)).unwrap();
        }

        let report = SyncEngine::new(temp.path(), "wiki", &mut mirror)
            .export_sql_to_json(true)
            .unwrap();
        assert_eq!(report.sql_to_json_inserted, 5);

        let manifest_after = std::fs::read_to_string(
            temp.path().join("wiki").join(MANIFEST_FILE),
        )
        .unwrap();
        assert_eq!(manifest_before, manifest_after, "dry run must not bump the manifest");
        let reader = SnapshotReader::open(temp.path(), "wiki").unwrap();
        assert_eq!(reader.record_count(), 0);
    }

    #[test]
    fn test_bidirectional_converges_both_stores() {
        let temp = TempDir::new().unwrap();
        write_dataset(temp.path(), vec![make_record(0), make_record(1)]);
        let mut mirror = MemoryMirror::new();
        mirror.insert(&make_record(2)).unwrap();

        let mut engine = SyncEngine::new(temp.path(), "wiki", &mut mirror);
        let report = engine.sync(None, false, None).unwrap();
        assert_eq!(report.direction, SyncDirection::Bidirectional);
        assert_eq!(report.json_to_sql_inserted, 2);
        assert_eq!(report.sql_to_json_inserted, 1);
        assert_eq!(engine.state(), SyncState::Completed);

        assert_eq!(mirror.count(&ScopeFilter::any()).unwrap(), 3);
        let reader = SnapshotReader::open(temp.path(), "wiki").unwrap();
        assert_eq!(reader.record_count(), 3);
    }

    #[test]
    fn test_sync_on_missing_dataset_aborts() {
        let temp = TempDir::new().unwrap();
        let mut mirror = MemoryMirror::new();
        let result = SyncEngine::new(temp.path(), "ghost", &mut mirror).sync(None, false, None);
        assert!(result.is_err());
    }

    #[test]
    fn test_already_mirrored_record_outside_manifest_scope_is_a_skip() {
        // The dataset declares wikipedia/page, but the pack carries a stray
        // crossref/article record the mirror already holds. The hash diff
        // must catch it; a conflict-with-itself would be wrong.
        let stray = ExchangeRecord::new(
            "fetch",
            "crossref",
            "article",
            Some("10.1000/x"),
            json!({}),
            json!({"title": "x"}),
        );
        let temp = TempDir::new().unwrap();
        let manifest = SnapshotManifest::new("wiki").with_scope(
            Some("fetch"),
            Some("wikipedia"),
            Some("page"),
        );
        let mut writer = SnapshotWriter::init(temp.path(), manifest, 100).unwrap();
        writer.write(stray.clone()).unwrap();
        writer.close().unwrap();

        let mut mirror = MemoryMirror::new();
        mirror.insert(&stray).unwrap();

        let report = SyncEngine::new(temp.path(), "wiki", &mut mirror)
            .import_json_to_sql(false, None)
            .unwrap();
        assert!(report.conflicts.is_empty());
        assert_eq!(report.json_to_sql_skipped, 1);
        assert_eq!(report.json_to_sql_inserted, 0);
        assert_eq!(report.json_to_sql_updated, 0);

        // A dry run estimates the same outcome.
        let dry = SyncEngine::new(temp.path(), "wiki", &mut mirror)
            .import_json_to_sql(true, None)
            .unwrap();
        assert!(dry.conflicts.is_empty());
        assert_eq!(dry.json_to_sql_skipped, 1);
    }

    #[test]
    fn test_scan_counts_physical_on_import_distinct_on_export() {
        // Two physical observations of one record: the import pass scans 2,
        // the export pass diffs 1 indexed hash, and a merged report keeps
        // the physical count.
        let temp = TempDir::new().unwrap();
        let record = make_record(0);
        write_dataset(temp.path(), vec![record.clone(), record]);
        let mut mirror = MemoryMirror::new();

        let mut engine = SyncEngine::new(temp.path(), "wiki", &mut mirror);
        let export = engine.export_sql_to_json(false).unwrap();
        assert_eq!(export.json_records_scanned, 1);

        let merged = engine.sync(None, false, None).unwrap();
        assert_eq!(merged.json_records_scanned, 2);
    }

    #[test]
    fn test_duplicate_observations_counted_once() {
        // Same content twice in the pack: second occurrence diffs as a skip.
        let temp = TempDir::new().unwrap();
        let record = make_record(0);
        write_dataset(temp.path(), vec![record.clone(), record]);
        let mut mirror = MemoryMirror::new();

        let report = SyncEngine::new(temp.path(), "wiki", &mut mirror)
            .import_json_to_sql(false, None)
            .unwrap();
        assert_eq!(report.json_records_scanned, 2);
        assert_eq!(report.json_to_sql_inserted, 1);
        assert_eq!(report.json_to_sql_skipped, 1);
    }
}
