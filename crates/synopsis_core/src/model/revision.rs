//! Ledger revision model.
//!
//! # Invariants
//! - `seq` is 1-based and gapless per entity.
//! - `prior_id` is `None` only for `seq == 1`.
//! - `content` is a full snapshot of the entity after the change.

use crate::model::workflow::EntityRef;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RevisionId = Uuid;

/// Change names recorded in the ledger besides workflow transitions.
pub mod changes {
    pub const CREATE: &str = "create";
    pub const IMPORT: &str = "import";
    pub const MERGE: &str = "merge";
    pub const ROLLBACK: &str = "rollback";
    pub const FLAG: &str = "flag_needs_help";
    pub const ATTACH_PROTOCOL: &str = "attach_protocol";
}

/// Immutable, stored revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub id: RevisionId,
    pub entity: EntityRef,
    pub seq: u32,
    pub prior_id: Option<RevisionId>,
    pub actor_id: String,
    pub transition: String,
    pub from_state: Option<String>,
    pub to_state: String,
    pub content: serde_json::Value,
    /// Epoch milliseconds.
    pub created_at: i64,
}

/// Revision payload supplied by callers; id, seq and prior link are assigned
/// on append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRevision {
    pub entity: EntityRef,
    pub actor_id: String,
    pub transition: String,
    pub from_state: Option<String>,
    pub to_state: String,
    pub content: serde_json::Value,
}
