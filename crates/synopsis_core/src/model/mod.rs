//! Domain model for the reference-to-synopsis pipeline.
//!
//! # Responsibility
//! - Define canonical data structures used by import, dedup, workflow,
//!   ledger and assembly.
//!
//! # Invariants
//! - Every managed entity is identified by a stable UUID v4.
//! - Entities are never hard-deleted; history lives in the revision ledger.
//! - `version` fields mirror the latest ledger sequence number and are not
//!   part of revision snapshots.

pub mod batch;
pub mod cluster;
pub mod protocol;
pub mod reference;
pub mod revision;
pub mod summary;
pub mod synopsis;
pub mod workflow;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}
