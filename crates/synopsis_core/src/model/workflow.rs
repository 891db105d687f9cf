//! Workflow vocabulary shared by every managed entity.
//!
//! # Responsibility
//! - Name entity kinds, lifecycle states and transitions.
//! - Describe the acting identity passed in by the caller.
//!
//! # Invariants
//! - `as_str` values are the persisted representation and never change.
//! - A `WorkflowState` always belongs to exactly one `EntityKind` family.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Kind of entity managed by the workflow engine and ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Reference,
    Summary,
    Protocol,
    Synopsis,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Summary => "summary",
            Self::Protocol => "protocol",
            Self::Synopsis => "synopsis",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reference" => Some(Self::Reference),
            "summary" => Some(Self::Summary),
            "protocol" => Some(Self::Protocol),
            "synopsis" => Some(Self::Synopsis),
            _ => None,
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed pointer at one managed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: Uuid) -> Self {
        Self { kind, id }
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Lifecycle of an imported bibliographic reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceState {
    Imported,
    Screening,
    Included,
    Excluded,
}

impl ReferenceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Imported => "imported",
            Self::Screening => "screening",
            Self::Included => "included",
            Self::Excluded => "excluded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "imported" => Some(Self::Imported),
            "screening" => Some(Self::Screening),
            "included" => Some(Self::Included),
            "excluded" => Some(Self::Excluded),
            _ => None,
        }
    }
}

/// Lifecycle shared by summaries and protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Draft,
    Submitted,
    UnderReview,
    ChangesRequested,
    Approved,
}

impl DocumentState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::ChangesRequested => "changes_requested",
            Self::Approved => "approved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "under_review" => Some(Self::UnderReview),
            "changes_requested" => Some(Self::ChangesRequested),
            "approved" => Some(Self::Approved),
            _ => None,
        }
    }
}

/// Lifecycle of a synopsis document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynopsisState {
    Assembling,
    Compiled,
    Published,
}

impl SynopsisState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assembling => "assembling",
            Self::Compiled => "compiled",
            Self::Published => "published",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "assembling" => Some(Self::Assembling),
            "compiled" => Some(Self::Compiled),
            "published" => Some(Self::Published),
            _ => None,
        }
    }
}

/// State of any managed entity, tagged by family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    Reference(ReferenceState),
    Document(DocumentState),
    Synopsis(SynopsisState),
}

impl WorkflowState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reference(state) => state.as_str(),
            Self::Document(state) => state.as_str(),
            Self::Synopsis(state) => state.as_str(),
        }
    }

    /// Parses a persisted state name for the given entity kind.
    pub fn parse(kind: EntityKind, value: &str) -> Option<Self> {
        match kind {
            EntityKind::Reference => ReferenceState::parse(value).map(Self::Reference),
            EntityKind::Summary | EntityKind::Protocol => {
                DocumentState::parse(value).map(Self::Document)
            }
            EntityKind::Synopsis => SynopsisState::parse(value).map(Self::Synopsis),
        }
    }

    /// Whether this state belongs to the lifecycle family of `kind`.
    pub fn belongs_to(self, kind: EntityKind) -> bool {
        matches!(
            (self, kind),
            (Self::Reference(_), EntityKind::Reference)
                | (Self::Document(_), EntityKind::Summary)
                | (Self::Document(_), EntityKind::Protocol)
                | (Self::Synopsis(_), EntityKind::Synopsis)
        )
    }
}

impl Display for WorkflowState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named edge requested by an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    StartScreening,
    Include,
    Exclude,
    Reopen,
    Edit,
    Submit,
    StartReview,
    RequestChanges,
    Approve,
    Revise,
    Resubmit,
    Compile,
    Publish,
    Reassemble,
}

impl Transition {
    pub const ALL: [Transition; 14] = [
        Self::StartScreening,
        Self::Include,
        Self::Exclude,
        Self::Reopen,
        Self::Edit,
        Self::Submit,
        Self::StartReview,
        Self::RequestChanges,
        Self::Approve,
        Self::Revise,
        Self::Resubmit,
        Self::Compile,
        Self::Publish,
        Self::Reassemble,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartScreening => "start_screening",
            Self::Include => "include",
            Self::Exclude => "exclude",
            Self::Reopen => "reopen",
            Self::Edit => "edit",
            Self::Submit => "submit",
            Self::StartReview => "start_review",
            Self::RequestChanges => "request_changes",
            Self::Approve => "approve",
            Self::Revise => "revise",
            Self::Resubmit => "resubmit",
            Self::Compile => "compile",
            Self::Publish => "publish",
            Self::Reassemble => "reassemble",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|transition| transition.as_str() == value)
    }

    /// Whether the edge carries replacement content.
    pub fn carries_content(self) -> bool {
        matches!(self, Self::Edit | Self::Resubmit)
    }
}

impl Display for Transition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known role names. Role sets are configuration; these are defaults.
pub mod roles {
    pub const MANAGER: &str = "manager";
    pub const AUTHOR: &str = "author";
    pub const EXTERNAL_COLLABORATOR: &str = "external_collaborator";
}

/// Identity performing an operation, resolved by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub roles: BTreeSet<String>,
}

impl Actor {
    pub fn new<I, S>(id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Identity used for revisions written by the pipeline itself.
    pub fn system() -> Self {
        Self::new("system", [roles::MANAGER])
    }

    pub fn has_any_role<'a>(&self, required: impl IntoIterator<Item = &'a String>) -> bool {
        required.into_iter().any(|role| self.roles.contains(role))
    }
}
