//! Sync reporting types: directions, conflict strategies, and the
//! structured report every sync invocation returns.
//!
//! Reports are ephemeral — produced per invocation, never persisted by the
//! engine. Success means an empty `errors` list; conflicts alone do not
//! make a run a failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which way a sync pass moves records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Import only: pack -> mirror.
    JsonToSql,
    /// Export only: mirror -> pack.
    SqlToJson,
    /// Import, then export, reports merged.
    #[default]
    Bidirectional,
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::JsonToSql => write!(f, "json_to_sql"),
            Self::SqlToJson => write!(f, "sql_to_json"),
            Self::Bidirectional => write!(f, "bidirectional"),
        }
    }
}

impl std::str::FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "json_to_sql" => Ok(Self::JsonToSql),
            "sql_to_json" => Ok(Self::SqlToJson),
            "bidirectional" => Ok(Self::Bidirectional),
            _ => Err(format!("Unknown sync direction: {s}")),
        }
    }
}

/// How a natural-key conflict between the two stores is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Later `observed_at_utc` wins; ties and missing-timestamp cases fall
    /// to the side being imported.
    #[default]
    PreferNewest,
    /// The mirror's version always wins.
    PreferSql,
    /// The pack's version always wins.
    PreferJson,
    /// Record an error for every conflict. Never aborts the batch.
    Fail,
}

impl std::str::FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "prefer_newest" => Ok(Self::PreferNewest),
            "prefer_sql" => Ok(Self::PreferSql),
            "prefer_json" => Ok(Self::PreferJson),
            "fail" => Ok(Self::Fail),
            _ => Err(format!("Unknown conflict strategy: {s}")),
        }
    }
}

/// Verdict for one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    JsonWins,
    SqlWins,
    Failed,
}

/// Resolve a conflict during an import pass (JSON is the importing side).
///
/// `prefer_newest` compares observation timestamps: a later or equal JSON
/// timestamp wins the tie for JSON; a non-null timestamp beats a null one;
/// both null falls to the importing side. Timestamps are optional here
/// because a mirror backend may hold rows without one even though records
/// produced by this crate always carry it.
#[must_use]
pub fn resolve_conflict(
    strategy: ConflictStrategy,
    json_observed_at: Option<DateTime<Utc>>,
    sql_observed_at: Option<DateTime<Utc>>,
) -> ConflictResolution {
    match strategy {
        ConflictStrategy::PreferJson => ConflictResolution::JsonWins,
        ConflictStrategy::PreferSql => ConflictResolution::SqlWins,
        ConflictStrategy::Fail => ConflictResolution::Failed,
        ConflictStrategy::PreferNewest => match (json_observed_at, sql_observed_at) {
            (Some(json), Some(sql)) => {
                if json >= sql {
                    ConflictResolution::JsonWins
                } else {
                    ConflictResolution::SqlWins
                }
            }
            (Some(_), None) => ConflictResolution::JsonWins,
            (None, Some(_)) => ConflictResolution::SqlWins,
            (None, None) => ConflictResolution::JsonWins,
        },
    }
}

/// One detected conflict: both stores hold different-hash records sharing a
/// natural key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub source_system: String,
    pub entity_type: String,
    pub natural_key: String,
    pub json_hash: String,
    pub sql_hash: String,
    pub json_observed_at: Option<DateTime<Utc>>,
    pub sql_observed_at: Option<DateTime<Utc>>,
    pub resolution: ConflictResolution,
}

/// Engine state within one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Scanning,
    Importing,
    Exporting,
    Completed,
    CompletedWithErrors,
}

/// Structured result of one sync invocation.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub direction: SyncDirection,
    pub strategy: ConflictStrategy,
    pub dry_run: bool,
    pub state: SyncState,

    /// Records seen on the pack side: physical records for an import pass,
    /// distinct indexed hashes for an export pass. In a merged bidirectional
    /// report this is the max across sub-reports (the physical count), not
    /// the sum.
    pub json_records_scanned: usize,
    /// Records seen on the mirror side. Max across sub-reports when merged.
    pub sql_records_scanned: usize,

    pub json_to_sql_inserted: usize,
    pub json_to_sql_updated: usize,
    pub json_to_sql_skipped: usize,
    pub sql_to_json_inserted: usize,

    pub conflicts: Vec<ConflictInfo>,
    pub errors: Vec<String>,
}

impl SyncReport {
    /// A fresh report in the `Idle` state.
    #[must_use]
    pub fn new(direction: SyncDirection, strategy: ConflictStrategy, dry_run: bool) -> Self {
        Self {
            direction,
            strategy,
            dry_run,
            state: SyncState::Idle,
            json_records_scanned: 0,
            sql_records_scanned: 0,
            json_to_sql_inserted: 0,
            json_to_sql_updated: 0,
            json_to_sql_skipped: 0,
            sql_to_json_inserted: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Success is the absence of errors, not of conflicts.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Set the terminal state from the collected errors.
    pub fn complete(&mut self) {
        self.state = if self.errors.is_empty() {
            SyncState::Completed
        } else {
            SyncState::CompletedWithErrors
        };
    }

    /// Fold another pass's report into this one: counts summed,
    /// conflict/error lists concatenated, scanned-record fields maxed.
    pub fn merge(&mut self, other: Self) {
        self.json_records_scanned = self.json_records_scanned.max(other.json_records_scanned);
        self.sql_records_scanned = self.sql_records_scanned.max(other.sql_records_scanned);
        self.json_to_sql_inserted += other.json_to_sql_inserted;
        self.json_to_sql_updated += other.json_to_sql_updated;
        self.json_to_sql_skipped += other.json_to_sql_skipped;
        self.sql_to_json_inserted += other.sql_to_json_inserted;
        self.conflicts.extend(other.conflicts);
        self.errors.extend(other.errors);
        self.complete();
    }
}
