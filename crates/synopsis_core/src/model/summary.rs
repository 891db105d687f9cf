//! Summary document model and content guards.
//!
//! # Responsibility
//! - Define the structured metadata attached to one reference summary.
//! - Enforce the word-count guard and controlled vocabularies.
//!
//! # Invariants
//! - A summary points at exactly one canonical (not merged) reference.
//! - Vocabulary-backed fields only hold configured terms; a field without a
//!   configured vocabulary is free text.

use crate::config::SummaryConfig;
use crate::model::workflow::DocumentState;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub type SummaryId = Uuid;

pub const MAX_EVIDENCE_STRENGTH: u8 = 100;

/// Structured, vocabulary-backed summary metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryMetadata {
    /// Conservation action the study tested; drives assembly grouping.
    pub action: String,
    #[serde(default)]
    pub threats: Vec<String>,
    #[serde(default)]
    pub taxa: Vec<String>,
    #[serde(default)]
    pub habitats: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub research_design: Option<String>,
    /// 0..=100; higher is stronger.
    #[serde(default)]
    pub evidence_strength: Option<u8>,
}

/// Replaceable summary content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryContent {
    pub metadata: SummaryMetadata,
    pub body: String,
}

/// Authored summary of one reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub id: SummaryId,
    pub reference_id: Uuid,
    pub metadata: SummaryMetadata,
    pub body: String,
    pub state: DocumentState,
    pub author: String,
    #[serde(skip)]
    pub version: u32,
}

impl Summary {
    pub fn new_draft(reference_id: Uuid, content: SummaryContent, author: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference_id,
            metadata: content.metadata,
            body: content.body,
            state: DocumentState::Draft,
            author: author.to_string(),
            version: 0,
        }
    }

    pub fn apply_content(&mut self, content: SummaryContent) {
        self.metadata = content.metadata;
        self.body = content.body;
    }
}

/// Rejection raised by content guards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentValidationError {
    #[error("action must not be empty")]
    EmptyAction,
    #[error("body has {words} words; limit is {max}")]
    TooManyWords { words: usize, max: usize },
    #[error("`{term}` is not in the `{field}` vocabulary")]
    UnknownTerm { field: &'static str, term: String },
    #[error("evidence strength {value} exceeds 100")]
    EvidenceStrengthOutOfRange { value: u8 },
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
    #[error("outline grouping key `{key}` is duplicated")]
    DuplicateGroupingKey { key: String },
}

/// Counts whitespace-separated words.
pub fn word_count(body: &str) -> usize {
    body.split_whitespace().count()
}

/// Validates summary metadata and body against configured rules.
pub fn validate_summary_content(
    content: &SummaryContent,
    rules: &SummaryConfig,
) -> Result<(), ContentValidationError> {
    let metadata = &content.metadata;
    if metadata.action.trim().is_empty() {
        return Err(ContentValidationError::EmptyAction);
    }

    let words = word_count(&content.body);
    if words > rules.max_words {
        return Err(ContentValidationError::TooManyWords {
            words,
            max: rules.max_words,
        });
    }

    if let Some(value) = metadata.evidence_strength {
        if value > MAX_EVIDENCE_STRENGTH {
            return Err(ContentValidationError::EvidenceStrengthOutOfRange { value });
        }
    }

    check_terms(rules, "action", std::slice::from_ref(&metadata.action))?;
    check_terms(rules, "threat", &metadata.threats)?;
    check_terms(rules, "taxon", &metadata.taxa)?;
    check_terms(rules, "habitat", &metadata.habitats)?;
    check_terms(rules, "location", &metadata.locations)?;
    if let Some(design) = metadata.research_design.as_ref() {
        check_terms(rules, "research_design", std::slice::from_ref(design))?;
    }
    Ok(())
}

fn check_terms(
    rules: &SummaryConfig,
    field: &'static str,
    terms: &[String],
) -> Result<(), ContentValidationError> {
    for term in terms {
        if term.trim().is_empty() {
            return Err(ContentValidationError::EmptyField { field });
        }
    }

    let Some(vocabulary) = rules.vocabularies.get(field) else {
        return Ok(());
    };
    if vocabulary.is_empty() {
        return Ok(());
    }

    for term in terms {
        let wanted = term.trim();
        let wanted_folded = wanted.to_lowercase();
        let known = vocabulary
            .iter()
            .any(|entry| entry.trim().to_lowercase() == wanted_folded);
        if !known {
            return Err(ContentValidationError::UnknownTerm {
                field,
                term: wanted.to_string(),
            });
        }
    }
    Ok(())
}
