//! Raw bibliographic record normalization.
//!
//! # Responsibility
//! - Decode raw tag/value bags into canonical reference drafts.
//! - Validate the required fields (title, authors, year).
//! - Derive the match keys used by duplicate detection.
//!
//! # Invariants
//! - Pure transformation: no I/O, no logging of field content.
//! - Text is NFC normalized with whitespace collapsed; non-Latin scripts are
//!   otherwise preserved.
//! - Commas never split authors; the first delimiter present in the order
//!   `;`, newline, ` and `, `&` splits one author value.
//! - Only a missing or blank year is malformed; unparseable years are kept
//!   as `Uncertain`.

use crate::config::DedupConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::reference::{NormalizedFields, RawField, ReferenceDraft, SourceId, YearValue};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static EXACT_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})(?:[/\-.][^\s]*)?$").expect("valid exact year regex"));
static YEAR_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\D)(\d{4})(?:\D|$)").expect("valid year run regex"));
static AND_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+and\s+").expect("valid author separator regex"));

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

/// One raw field value as received from an import source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Text(String),
    /// Undecoded bytes: UTF-8, or UTF-16 with a byte order mark.
    Bytes(Vec<u8>),
}

/// Ordered tag/value bag for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    pub fields: Vec<(String, RawValue)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_text(tag, value);
        self
    }

    pub fn push_text(&mut self, tag: impl Into<String>, value: impl Into<String>) {
        self.fields
            .push((tag.into(), RawValue::Text(value.into())));
    }

    pub fn push_bytes(&mut self, tag: impl Into<String>, value: Vec<u8>) {
        self.fields.push((tag.into(), RawValue::Bytes(value)));
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Best-effort textual view used for quarantine; undecodable bytes are
    /// rendered lossily.
    pub fn lossy_fields(&self) -> Vec<RawField> {
        self.fields
            .iter()
            .map(|(tag, value)| RawField {
                tag: tag.clone(),
                value: match value {
                    RawValue::Text(text) => text.clone(),
                    RawValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                },
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Title,
    Author,
    Year,
    Doi,
    Isbn,
    OtherId,
    Journal,
    Abstract,
    Url,
    Keywords,
}

fn field_for_tag(tag: &str) -> Option<FieldKind> {
    let field = match tag.trim().to_ascii_lowercase().as_str() {
        "ti" | "t1" | "title" => FieldKind::Title,
        "au" | "a1" | "author" | "authors" => FieldKind::Author,
        "py" | "y1" | "da" | "year" => FieldKind::Year,
        "do" | "doi" => FieldKind::Doi,
        "sn" | "isbn" | "issn" => FieldKind::Isbn,
        "an" | "accession" => FieldKind::OtherId,
        "jo" | "jf" | "t2" | "journal" => FieldKind::Journal,
        "ab" | "n2" | "abstract" => FieldKind::Abstract,
        "ur" | "url" => FieldKind::Url,
        "kw" | "keywords" => FieldKind::Keywords,
        _ => return None,
    };
    Some(field)
}

/// Record normalizer configured with dedup stop words.
#[derive(Debug, Clone)]
pub struct Normalizer {
    stop_words: HashSet<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(&DedupConfig::default())
    }
}

impl Normalizer {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            stop_words: config.stop_words.iter().map(|word| fold(word)).collect(),
        }
    }

    /// Normalizes one record into a reference draft.
    ///
    /// # Errors
    /// - `UnsupportedEncoding` when a value cannot be decoded losslessly.
    /// - `MalformedRecord` listing every missing required field.
    pub fn normalize(&self, record_index: usize, record: &RawRecord) -> CoreResult<ReferenceDraft> {
        let mut raw_fields = Vec::with_capacity(record.fields.len());
        let mut title = None;
        let mut authors = Vec::new();
        let mut year_raw = None;
        let mut doi = None;
        let mut isbn = None;
        let mut other_id = None;
        let mut journal = None;
        let mut abstract_text = None;
        let mut url = None;
        let mut keywords = Vec::new();

        for (tag, value) in &record.fields {
            let text = decode_value(record_index, tag, value)?;
            if let Some(field) = field_for_tag(tag) {
                match field {
                    FieldKind::Title => set_first(&mut title, clean_text(&text)),
                    FieldKind::Author => authors.extend(split_authors(&text)),
                    FieldKind::Year => set_first(&mut year_raw, clean_text(&text)),
                    FieldKind::Doi => set_first(&mut doi, normalize_doi(&text)),
                    FieldKind::Isbn => set_first(&mut isbn, normalize_isbn(&text)),
                    FieldKind::OtherId => set_first(&mut other_id, clean_text(&text)),
                    FieldKind::Journal => set_first(&mut journal, clean_text(&text)),
                    FieldKind::Abstract => set_first(&mut abstract_text, clean_text(&text)),
                    FieldKind::Url => set_first(&mut url, clean_text(&text)),
                    FieldKind::Keywords => keywords.extend(
                        text.split(';')
                            .map(clean_text)
                            .filter(|keyword| !keyword.is_empty()),
                    ),
                }
            }
            raw_fields.push(RawField {
                tag: tag.clone(),
                value: text,
            });
        }

        let mut missing = Vec::new();
        if title.is_none() {
            missing.push("title");
        }
        if authors.is_empty() {
            missing.push("authors");
        }
        if year_raw.is_none() {
            missing.push("year");
        }
        let (Some(title), Some(year_raw)) = (title, year_raw) else {
            return Err(CoreError::MalformedRecord {
                record_index,
                missing,
            });
        };
        if !missing.is_empty() {
            return Err(CoreError::MalformedRecord {
                record_index,
                missing,
            });
        }

        let source_id = doi
            .map(SourceId::Doi)
            .or_else(|| isbn.map(SourceId::Isbn))
            .or_else(|| other_id.map(SourceId::Other));
        let normalized = NormalizedFields {
            title_tokens: self.title_tokens(&title),
            author_keys: author_keys(&authors),
        };

        Ok(ReferenceDraft {
            title,
            authors,
            year: parse_year(&year_raw),
            source_id,
            journal,
            abstract_text,
            url,
            keywords,
            normalized,
            raw_fields,
        })
    }

    /// Folded, sorted, deduplicated title tokens without stop words.
    pub fn title_tokens(&self, title: &str) -> Vec<String> {
        fold(title)
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty() && !self.stop_words.contains(*token))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn set_first(slot: &mut Option<String>, value: String) {
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value);
    }
}

fn decode_value(record_index: usize, tag: &str, value: &RawValue) -> CoreResult<String> {
    let unsupported = |detail: &str| CoreError::UnsupportedEncoding {
        record_index,
        tag: tag.to_string(),
        detail: detail.to_string(),
    };

    let text = match value {
        RawValue::Text(text) => text.clone(),
        RawValue::Bytes(bytes) => decode_bytes(bytes).map_err(|detail| unsupported(detail))?,
    };
    if text.contains('\u{FFFD}') {
        return Err(unsupported("value contains replacement characters"));
    }
    Ok(text)
}

fn decode_bytes(bytes: &[u8]) -> Result<String, &'static str> {
    match bytes {
        [0xEF, 0xBB, 0xBF, rest @ ..] => {
            String::from_utf8(rest.to_vec()).map_err(|_| "invalid UTF-8")
        }
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        _ => String::from_utf8(bytes.to_vec()).map_err(|_| "not UTF-8 and no UTF-16 byte order mark"),
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, &'static str> {
    if bytes.len() % 2 != 0 {
        return Err("truncated UTF-16 value");
    }
    let units = bytes.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|_| "invalid UTF-16 surrogate")
}

/// Trims, collapses internal whitespace and applies NFC.
pub fn clean_text(value: &str) -> String {
    let composed: String = value.nfc().collect();
    composed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits one author value using the documented delimiter precedence.
pub fn split_authors(value: &str) -> Vec<String> {
    let pieces: Vec<&str> = if value.contains(';') {
        value.split(';').collect()
    } else if value.contains('\n') {
        value.lines().collect()
    } else if AND_SEPARATOR_RE.is_match(value) {
        AND_SEPARATOR_RE.split(value).collect()
    } else if value.contains('&') {
        value.split('&').collect()
    } else {
        vec![value]
    };

    pieces
        .into_iter()
        .map(clean_text)
        .filter(|author| !author.is_empty())
        .collect()
}

/// Classifies a non-blank year value.
pub fn parse_year(raw: &str) -> YearValue {
    let trimmed = raw.trim();
    if let Some(year) = EXACT_YEAR_RE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .and_then(|year| year.as_str().parse::<i32>().ok())
    {
        return YearValue::Exact { year };
    }

    let guess = YEAR_RUN_RE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .and_then(|year| year.as_str().parse::<i32>().ok());
    YearValue::Uncertain {
        guess,
        raw: trimmed.to_string(),
    }
}

pub fn normalize_doi(value: &str) -> String {
    let mut doi = value.trim().to_lowercase();
    for prefix in DOI_PREFIXES {
        if let Some(stripped) = doi.strip_prefix(prefix) {
            doi = stripped.trim().to_string();
            break;
        }
    }
    doi
}

pub fn normalize_isbn(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Lowercases and removes diacritics.
pub fn fold(value: &str) -> String {
    value
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Folded family names, sorted and deduplicated.
pub fn author_keys(authors: &[String]) -> Vec<String> {
    authors
        .iter()
        .filter_map(|author| {
            let family = match author.split_once(',') {
                Some((family, _)) => family,
                None => author.split_whitespace().last().unwrap_or(author.as_str()),
            };
            let key: String = fold(family).chars().filter(|c| c.is_alphanumeric()).collect();
            (!key.is_empty()).then_some(key)
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
