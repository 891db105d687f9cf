//! Bibliographic reference model.
//!
//! # Responsibility
//! - Define the canonical reference shape produced by normalization.
//! - Carry raw-import provenance alongside normalized match keys.
//!
//! # Invariants
//! - `title`, `authors` and `year` are always present on a stored reference.
//! - A reference with `merged_into` set is never the target of a transition.
//! - References are never deleted; merges only set `merged_into`.

use crate::model::workflow::ReferenceState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ReferenceId = Uuid;

/// Normalized source identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SourceId {
    Doi(String),
    Isbn(String),
    Other(String),
}

impl SourceId {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Doi(_) => "doi",
            Self::Isbn(_) => "isbn",
            Self::Other(_) => "other",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Doi(value) | Self::Isbn(value) | Self::Other(value) => value,
        }
    }

    pub fn from_parts(kind: &str, value: String) -> Option<Self> {
        match kind {
            "doi" => Some(Self::Doi(value)),
            "isbn" => Some(Self::Isbn(value)),
            "other" => Some(Self::Other(value)),
            _ => None,
        }
    }
}

/// Publication year as recorded by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum YearValue {
    Exact { year: i32 },
    /// Value present but not a plain year; `guess` is the first 4-digit run.
    Uncertain { guess: Option<i32>, raw: String },
}

impl YearValue {
    pub fn exact(&self) -> Option<i32> {
        match self {
            Self::Exact { year } => Some(*year),
            Self::Uncertain { .. } => None,
        }
    }

    /// Exact year, or the guessed year for uncertain values.
    pub fn best_guess(&self) -> Option<i32> {
        match self {
            Self::Exact { year } => Some(*year),
            Self::Uncertain { guess, .. } => *guess,
        }
    }
}

/// Match keys derived from the canonical fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedFields {
    /// Sorted, deduplicated, folded title tokens without stop words.
    pub title_tokens: Vec<String>,
    /// Sorted, deduplicated, folded family names.
    pub author_keys: Vec<String>,
}

/// One raw tag/value pair as received, after decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawField {
    pub tag: String,
    pub value: String,
}

/// Where a reference came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub batch_id: Option<Uuid>,
    pub record_index: usize,
    pub raw_fields: Vec<RawField>,
    /// Epoch milliseconds.
    pub imported_at: i64,
}

/// Normalizer output before identity and provenance are attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDraft {
    pub title: String,
    pub authors: Vec<String>,
    pub year: YearValue,
    pub source_id: Option<SourceId>,
    pub journal: Option<String>,
    pub abstract_text: Option<String>,
    pub url: Option<String>,
    pub keywords: Vec<String>,
    pub normalized: NormalizedFields,
    pub raw_fields: Vec<RawField>,
}

/// Stored bibliographic record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: ReferenceId,
    pub title: String,
    pub authors: Vec<String>,
    pub year: YearValue,
    pub source_id: Option<SourceId>,
    pub journal: Option<String>,
    pub abstract_text: Option<String>,
    pub url: Option<String>,
    pub keywords: Vec<String>,
    pub normalized: NormalizedFields,
    pub provenance: Provenance,
    pub state: ReferenceState,
    pub cluster_id: Option<Uuid>,
    pub merged_into: Option<ReferenceId>,
    /// Raised by an author during screening when a record needs attention.
    pub needs_help: bool,
    /// Latest ledger sequence number; not part of the snapshot.
    #[serde(skip)]
    pub version: u32,
}

impl Reference {
    /// Creates an `imported` reference with a generated id.
    pub fn from_draft(
        draft: ReferenceDraft,
        batch_id: Option<Uuid>,
        record_index: usize,
        imported_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: draft.title,
            authors: draft.authors,
            year: draft.year,
            source_id: draft.source_id,
            journal: draft.journal,
            abstract_text: draft.abstract_text,
            url: draft.url,
            keywords: draft.keywords,
            normalized: draft.normalized,
            provenance: Provenance {
                batch_id,
                record_index,
                raw_fields: draft.raw_fields,
                imported_at,
            },
            state: ReferenceState::Imported,
            cluster_id: None,
            merged_into: None,
            needs_help: false,
            version: 0,
        }
    }

    pub fn is_merged(&self) -> bool {
        self.merged_into.is_some()
    }

    /// Count of complete required fields used by the merge tie-break.
    ///
    /// Title, authors, an exact year and a source identifier each count once.
    pub fn completeness(&self) -> u8 {
        let mut score = 0;
        if !self.title.trim().is_empty() {
            score += 1;
        }
        if !self.authors.is_empty() {
            score += 1;
        }
        if self.year.exact().is_some() {
            score += 1;
        }
        if self.source_id.is_some() {
            score += 1;
        }
        score
    }
}

#[cfg(test)]
mod tests {
    use super::{NormalizedFields, Reference, ReferenceDraft, SourceId, YearValue};

    fn draft(year: YearValue, source_id: Option<SourceId>) -> ReferenceDraft {
        ReferenceDraft {
            title: "Nest boxes for owls".to_string(),
            authors: vec!["Smith, J.".to_string()],
            year,
            source_id,
            journal: None,
            abstract_text: None,
            url: None,
            keywords: Vec::new(),
            normalized: NormalizedFields::default(),
            raw_fields: Vec::new(),
        }
    }

    #[test]
    fn completeness_counts_exact_year_and_source() {
        let full = Reference::from_draft(
            draft(
                YearValue::Exact { year: 2001 },
                Some(SourceId::Doi("10.1/x".to_string())),
            ),
            None,
            0,
            1,
        );
        let partial = Reference::from_draft(
            draft(
                YearValue::Uncertain {
                    guess: Some(2001),
                    raw: "c. 2001".to_string(),
                },
                None,
            ),
            None,
            1,
            1,
        );
        assert_eq!(full.completeness(), 4);
        assert_eq!(partial.completeness(), 2);
    }

    #[test]
    fn snapshot_excludes_version() {
        let mut reference =
            Reference::from_draft(draft(YearValue::Exact { year: 1999 }, None), None, 0, 5);
        reference.version = 7;
        let json = serde_json::to_value(&reference).unwrap();
        assert!(json.get("version").is_none());
        assert_eq!(json["year"]["kind"], "exact");
    }
}
