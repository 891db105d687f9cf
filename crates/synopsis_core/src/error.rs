//! Domain error taxonomy.
//!
//! # Responsibility
//! - Define the single error type returned by import, dedup, workflow,
//!   ledger and assembly operations.
//! - Expose a stable machine-readable reason code per variant.
//!
//! # Invariants
//! - Every rejection names the offending entity or record where one exists.
//! - Transient variants (`Timeout`, `Cancelled`, `ConcurrentConflict`) never
//!   leave partial state behind; the whole operation may be retried.

use crate::config::ConfigError;
use crate::db::DbError;
use crate::model::summary::ContentValidationError;
use crate::model::workflow::EntityKind;
use rusqlite::ErrorCode;
use thiserror::Error;
use uuid::Uuid;

pub type CoreResult<T> = Result<T, CoreError>;

/// Error returned by core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Import record lacks one or more required fields.
    #[error("malformed record #{record_index}: missing {}", .missing.join(", "))]
    MalformedRecord {
        record_index: usize,
        missing: Vec<&'static str>,
    },
    /// Import record carries bytes that cannot be decoded losslessly.
    #[error("unsupported encoding in record #{record_index}, field `{tag}`: {detail}")]
    UnsupportedEncoding {
        record_index: usize,
        tag: String,
        detail: String,
    },
    /// Merge requested while cluster members still have other open pairings.
    #[error("cluster {cluster_id} is ambiguous: members are also pending in {conflicting:?}")]
    AmbiguousCluster {
        cluster_id: Uuid,
        conflicting: Vec<Uuid>,
    },
    /// No edge for the requested transition from the current state.
    #[error("illegal transition `{transition}` for {kind} {entity_id} in state `{state}`: {reason}")]
    IllegalTransition {
        kind: EntityKind,
        entity_id: Uuid,
        state: String,
        transition: String,
        reason: String,
    },
    /// Actor holds none of the roles required for the edge.
    #[error(
        "actor `{actor_id}` may not `{transition}` {kind} {entity_id}; requires one of {required:?}"
    )]
    CapabilityDenied {
        kind: EntityKind,
        entity_id: Uuid,
        transition: String,
        actor_id: String,
        required: Vec<String>,
    },
    /// Rollback target is not part of the entity's revision chain.
    #[error("revision {revision_id} is not in the history of {entity_id}")]
    UnknownRevision { entity_id: Uuid, revision_id: Uuid },
    /// Idempotency token already bound to a different request.
    #[error("idempotency token `{token}` was already used for a different request on {entity_id}")]
    IdempotencyConflict { token: String, entity_id: Uuid },
    /// Assembly found empty groupings or unapproved constituents.
    #[error(
        "incomplete assembly for synopsis {synopsis_id}: empty groups {empty_groups:?}, pending summaries {pending_summaries:?}"
    )]
    IncompleteAssembly {
        synopsis_id: Uuid,
        empty_groups: Vec<String>,
        pending_summaries: Vec<Uuid>,
    },
    #[error("operation timed out after processing {processed} item(s)")]
    Timeout { processed: usize },
    #[error("operation cancelled after processing {processed} item(s)")]
    Cancelled { processed: usize },
    /// Another writer holds the entity or the database.
    #[error("concurrent conflict{}: {detail}", .entity_id.map(|id| format!(" on {id}")).unwrap_or_default())]
    ConcurrentConflict {
        entity_id: Option<Uuid>,
        detail: String,
    },
    /// Request shape does not fit the operation (missing or unexpected content).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },
    #[error("validation failed: {0}")]
    Validation(#[from] ContentValidationError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Stable reason code for logs and callers.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::MalformedRecord { .. } => "malformed_record",
            Self::UnsupportedEncoding { .. } => "unsupported_encoding",
            Self::AmbiguousCluster { .. } => "ambiguous_cluster",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::CapabilityDenied { .. } => "capability_denied",
            Self::UnknownRevision { .. } => "unknown_revision",
            Self::IdempotencyConflict { .. } => "idempotency_conflict",
            Self::IncompleteAssembly { .. } => "incomplete_assembly",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::ConcurrentConflict { .. } => "concurrent_conflict",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation_failed",
            Self::Db(_) => "storage_error",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::InvalidData(_) => "invalid_data",
            Self::Serialization(_) => "serialization_error",
        }
    }

    /// Whether retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Cancelled { .. } | Self::ConcurrentConflict { .. }
        )
    }

    /// Offending entity or record id, when the error names one.
    pub fn subject_id(&self) -> Option<Uuid> {
        match self {
            Self::AmbiguousCluster { cluster_id, .. } => Some(*cluster_id),
            Self::IllegalTransition { entity_id, .. }
            | Self::CapabilityDenied { entity_id, .. }
            | Self::UnknownRevision { entity_id, .. }
            | Self::IdempotencyConflict { entity_id, .. } => Some(*entity_id),
            Self::IncompleteAssembly { synopsis_id, .. } => Some(*synopsis_id),
            Self::ConcurrentConflict { entity_id, .. } => *entity_id,
            Self::NotFound { id, .. } => Some(*id),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(value: rusqlite::Error) -> Self {
        match value.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::ConcurrentConflict {
                    entity_id: None,
                    detail: value.to_string(),
                }
            }
            _ => Self::Db(DbError::Sqlite(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CoreError;
    use uuid::Uuid;

    #[test]
    fn reason_codes_are_stable_snake_case() {
        let err = CoreError::MalformedRecord {
            record_index: 3,
            missing: vec!["title", "year"],
        };
        assert_eq!(err.reason_code(), "malformed_record");
        assert!(err.to_string().contains("title, year"));
    }

    #[test]
    fn transient_errors_are_flagged() {
        assert!(CoreError::Timeout { processed: 2 }.is_transient());
        assert!(CoreError::ConcurrentConflict {
            entity_id: None,
            detail: "busy".to_string()
        }
        .is_transient());
        assert!(!CoreError::UnknownRevision {
            entity_id: Uuid::new_v4(),
            revision_id: Uuid::new_v4()
        }
        .is_transient());
    }

    #[test]
    fn subject_id_points_at_offending_entity() {
        let id = Uuid::new_v4();
        let err = CoreError::NotFound {
            kind: "summary",
            id,
        };
        assert_eq!(err.subject_id(), Some(id));
    }
}
