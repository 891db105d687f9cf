//! Deterministic synopsis assembly.
//!
//! # Responsibility
//! - Define the logical content tree of a compiled synopsis.
//! - Build it from approved content (`compiler`) and hand it to renderers
//!   (`render`).
//!
//! # Invariants
//! - The tree is a derived view and is never stored.
//! - Identical inputs serialize to byte-identical canonical JSON: every list
//!   has a defined order and the tree carries no timestamps.

pub mod compiler;
pub mod render;

use crate::config::FrontMatterChapter;
use crate::error::CoreResult;
use crate::model::synopsis::Constituent;
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

pub use compiler::{compile_tree, AssemblyInput, Candidate, ProtocolInput};
pub use render::{JsonRenderer, Renderer};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentTree {
    pub synopsis_id: Uuid,
    pub title: String,
    pub front_matter: Vec<FrontMatterChapter>,
    /// Approved protocol, emitted as the methods chapter.
    pub methods: Option<MethodsNode>,
    pub groups: Vec<GroupNode>,
    pub warnings: Vec<AssemblyWarning>,
}

impl ContentTree {
    /// Canonical JSON; identical trees yield identical strings.
    pub fn to_canonical_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Distinct `(summary, revision)` pairs placed in the tree, sorted.
    pub fn constituents(&self) -> Vec<Constituent> {
        self.groups
            .iter()
            .flat_map(|group| group.actions.iter())
            .flat_map(|action| action.entries.iter())
            .map(|entry| Constituent {
                summary_id: entry.summary_id,
                revision_id: entry.revision_id,
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// No warning other than summaries left behind by excluded references.
    pub fn is_complete(&self) -> bool {
        self.warnings
            .iter()
            .all(|warning| matches!(warning, AssemblyWarning::ExcludedReference { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodsNode {
    pub protocol_id: Uuid,
    pub revision_id: Uuid,
    pub title: String,
    pub body: String,
}

/// One outline grouping (chapter).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupNode {
    pub key: String,
    pub title: String,
    pub position: u32,
    /// No eligible summary under any of the grouping's actions.
    pub empty: bool,
    pub actions: Vec<ActionNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionNode {
    pub name: String,
    pub entries: Vec<EntryNode>,
    /// Summaries for this action that are not yet eligible.
    pub gaps: Vec<GapMarker>,
}

/// One approved summary placed under an action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryNode {
    pub reference_id: Uuid,
    pub summary_id: Uuid,
    pub revision_id: Uuid,
    pub reference_title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub evidence_strength: Option<u8>,
    pub body: String,
}

/// Placeholder for a summary that blocks completeness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GapMarker {
    pub summary_id: Uuid,
    pub reference_id: Uuid,
    pub summary_state: String,
    pub reference_state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssemblyWarning {
    EmptyGroup { key: String },
    PendingSummary { summary_id: Uuid, action: String },
    ProtocolNotApproved { protocol_id: Uuid, state: String },
    /// Summary whose reference was screened out; never blocks completeness.
    ExcludedReference { summary_id: Uuid, reference_id: Uuid },
}
