//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define per-entity persistence contracts (create, get, update, list by
//!   state).
//! - Isolate SQL and JSON column encoding from services and the engine.
//!
//! # Invariants
//! - Repositories never append ledger revisions; callers pair each row
//!   update with one revision inside the same transaction.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Rows are never deleted.

pub mod batch_repo;
pub mod cluster_repo;
pub mod protocol_repo;
pub mod reference_repo;
pub mod summary_repo;
pub mod synopsis_repo;

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

pub(crate) use crate::ledger::parse_uuid;

/// Load/save seam used by the workflow engine for any managed entity.
pub trait EntityStore<E> {
    fn load(&self, id: Uuid) -> CoreResult<Option<E>>;
    fn save(&self, entity: &E) -> CoreResult<()>;
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> CoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(column: &str, value: &str) -> CoreResult<T> {
    serde_json::from_str(value)
        .map_err(|err| CoreError::InvalidData(format!("column `{column}` is not valid JSON: {err}")))
}

pub(crate) fn parse_optional_uuid(value: Option<String>) -> CoreResult<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

pub(crate) fn ensure_updated(changed: usize, kind: &'static str, id: Uuid) -> CoreResult<()> {
    if changed == 0 {
        return Err(CoreError::NotFound { kind, id });
    }
    Ok(())
}
