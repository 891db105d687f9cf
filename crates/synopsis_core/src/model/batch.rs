//! Import batch and quarantine records.

use crate::model::reference::RawField;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type BatchId = Uuid;

/// How a batch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchTermination {
    Running,
    Completed,
    Cancelled,
    TimedOut,
}

impl BatchTermination {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }
}

/// Caller-supplied description of one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDescriptor {
    pub label: String,
    pub source_label: Option<String>,
    /// ISO dates of the literature search that produced the records.
    pub search_date_start: Option<String>,
    pub search_date_end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: BatchId,
    pub descriptor: BatchDescriptor,
    pub processed: usize,
    pub imported: usize,
    pub quarantined: usize,
    pub termination: BatchTermination,
    pub created_at: i64,
}

/// Import-time failure kept for later inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantinedRecord {
    pub batch_id: BatchId,
    pub record_index: usize,
    pub reason_code: String,
    pub message: String,
    pub raw_fields: Vec<RawField>,
}
