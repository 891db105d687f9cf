//! Protocol document model.
//!
//! A protocol describes the methods of one synopsis and follows the same
//! review lifecycle and versioning discipline as a summary.

use crate::model::workflow::DocumentState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ProtocolId = Uuid;

/// Replaceable protocol content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolContent {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: ProtocolId,
    pub synopsis_id: Uuid,
    pub title: String,
    pub body: String,
    pub state: DocumentState,
    pub author: String,
    #[serde(skip)]
    pub version: u32,
}

impl Protocol {
    pub fn new_draft(synopsis_id: Uuid, content: ProtocolContent, author: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            synopsis_id,
            title: content.title,
            body: content.body,
            state: DocumentState::Draft,
            author: author.to_string(),
            version: 0,
        }
    }

    pub fn apply_content(&mut self, content: ProtocolContent) {
        self.title = content.title;
        self.body = content.body;
    }
}
