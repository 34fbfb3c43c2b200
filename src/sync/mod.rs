//! Conflict-aware reconciliation between a snapshot pack and a SQL mirror.
//!
//! The engine diffs the two stores by content hash, imports pack records
//! the mirror lacks, exports mirror rows the pack lacks, and resolves
//! natural-key conflicts by policy. One engine invocation produces one
//! [`SyncReport`].

mod engine;
mod report;

pub use engine::SyncEngine;
pub use report::{
    resolve_conflict, ConflictInfo, ConflictResolution, ConflictStrategy, SyncDirection,
    SyncReport, SyncState,
};
