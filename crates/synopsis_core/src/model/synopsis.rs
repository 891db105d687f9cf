//! Synopsis model and outline.
//!
//! # Invariants
//! - Outline groupings are ordered by `position`, then `key`.
//! - Grouping keys are unique within one outline.
//! - The compiled content tree is derived on demand and never stored.

use crate::model::summary::ContentValidationError;
use crate::model::workflow::SynopsisState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub type SynopsisId = Uuid;

/// One chapter of the outline: a named group of actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionGrouping {
    pub key: String,
    pub title: String,
    pub position: u32,
    /// Action names in presentation order.
    pub actions: Vec<String>,
}

/// Summary revision that went into a compiled synopsis.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Constituent {
    pub summary_id: Uuid,
    pub revision_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synopsis {
    pub id: SynopsisId,
    pub title: String,
    pub outline: Vec<ActionGrouping>,
    pub protocol_id: Option<Uuid>,
    /// Set by `compile`, kept by `publish`, cleared by `reassemble`.
    #[serde(default)]
    pub constituents: Vec<Constituent>,
    pub state: SynopsisState,
    #[serde(skip)]
    pub version: u32,
}

impl Synopsis {
    /// Creates an `assembling` synopsis with a canonicalized outline.
    pub fn new(
        title: impl Into<String>,
        outline: Vec<ActionGrouping>,
    ) -> Result<Self, ContentValidationError> {
        Ok(Self {
            id: Uuid::new_v4(),
            title: title.into(),
            outline: canonical_outline(outline)?,
            protocol_id: None,
            constituents: Vec::new(),
            state: SynopsisState::Assembling,
            version: 0,
        })
    }
}

/// Sorts groupings by `(position, key)` and rejects duplicate keys.
pub fn canonical_outline(
    mut outline: Vec<ActionGrouping>,
) -> Result<Vec<ActionGrouping>, ContentValidationError> {
    let mut seen = BTreeSet::new();
    for grouping in &outline {
        if grouping.key.trim().is_empty() {
            return Err(ContentValidationError::EmptyField {
                field: "grouping key",
            });
        }
        if !seen.insert(grouping.key.clone()) {
            return Err(ContentValidationError::DuplicateGroupingKey {
                key: grouping.key.clone(),
            });
        }
    }
    outline.sort_by(|left, right| {
        left.position
            .cmp(&right.position)
            .then_with(|| left.key.cmp(&right.key))
    });
    Ok(outline)
}
