//! Reference repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist canonical references with their provenance and match keys.
//! - Serve the non-merged population snapshot used by duplicate scans.
//!
//! # Invariants
//! - `title`, `authors` and `year` are always stored.
//! - Population reads exclude references merged into another.

use crate::dedup::DedupRecord;
use crate::error::{CoreError, CoreResult};
use crate::model::reference::{Provenance, Reference, ReferenceId, SourceId};
use crate::model::workflow::ReferenceState;
use crate::repo::{ensure_updated, from_json, parse_optional_uuid, parse_uuid, to_json, EntityStore};
use rusqlite::{params, Connection, Row};

const REFERENCE_SELECT_SQL: &str = "SELECT
    reference_uuid,
    batch_uuid,
    record_index,
    title,
    authors_json,
    year_json,
    source_kind,
    source_value,
    journal,
    abstract_text,
    url,
    keywords_json,
    title_tokens_json,
    author_keys_json,
    raw_fields_json,
    state,
    cluster_uuid,
    merged_into,
    needs_help,
    version,
    imported_at
FROM bib_references";

/// Repository interface for references.
pub trait ReferenceRepository {
    fn insert(&self, reference: &Reference) -> CoreResult<()>;
    fn get(&self, id: ReferenceId) -> CoreResult<Option<Reference>>;
    /// Writes mutable fields: state, cluster, merge link, flag and version.
    fn update(&self, reference: &Reference) -> CoreResult<()>;
    fn list_by_state(&self, state: ReferenceState) -> CoreResult<Vec<Reference>>;
    fn list_by_ids(&self, ids: &[ReferenceId]) -> CoreResult<Vec<Reference>>;
    /// Match projections of every reference not merged away.
    fn dedup_population(&self) -> CoreResult<Vec<DedupRecord>>;
}

pub struct SqliteReferenceRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteReferenceRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> CoreResult<Vec<Reference>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawReference::from_row)?;
        let mut references = Vec::new();
        for row in rows {
            references.push(row?.into_reference()?);
        }
        Ok(references)
    }
}

impl ReferenceRepository for SqliteReferenceRepository<'_> {
    fn insert(&self, reference: &Reference) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO bib_references (
                reference_uuid, batch_uuid, record_index, title, authors_json,
                year_json, source_kind, source_value, journal, abstract_text, url,
                keywords_json, title_tokens_json, author_keys_json, raw_fields_json,
                state, cluster_uuid, merged_into, needs_help, version, imported_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                       ?15, ?16, ?17, ?18, ?19, ?20, ?21);",
            params![
                reference.id.to_string(),
                reference.provenance.batch_id.map(|id| id.to_string()),
                reference.provenance.record_index as i64,
                reference.title,
                to_json(&reference.authors)?,
                to_json(&reference.year)?,
                reference.source_id.as_ref().map(SourceId::kind),
                reference.source_id.as_ref().map(SourceId::value),
                reference.journal,
                reference.abstract_text,
                reference.url,
                to_json(&reference.keywords)?,
                to_json(&reference.normalized.title_tokens)?,
                to_json(&reference.normalized.author_keys)?,
                to_json(&reference.provenance.raw_fields)?,
                reference.state.as_str(),
                reference.cluster_id.map(|id| id.to_string()),
                reference.merged_into.map(|id| id.to_string()),
                i64::from(reference.needs_help),
                reference.version,
                reference.provenance.imported_at,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: ReferenceId) -> CoreResult<Option<Reference>> {
        let sql = format!("{REFERENCE_SELECT_SQL} WHERE reference_uuid = ?1;");
        Ok(self.query(&sql, [id.to_string()])?.into_iter().next())
    }

    fn update(&self, reference: &Reference) -> CoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE bib_references
             SET
                state = ?2,
                cluster_uuid = ?3,
                merged_into = ?4,
                needs_help = ?5,
                version = ?6,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE reference_uuid = ?1;",
            params![
                reference.id.to_string(),
                reference.state.as_str(),
                reference.cluster_id.map(|id| id.to_string()),
                reference.merged_into.map(|id| id.to_string()),
                i64::from(reference.needs_help),
                reference.version,
            ],
        )?;
        ensure_updated(changed, "reference", reference.id)
    }

    fn list_by_state(&self, state: ReferenceState) -> CoreResult<Vec<Reference>> {
        let sql = format!("{REFERENCE_SELECT_SQL} WHERE state = ?1 ORDER BY reference_uuid ASC;");
        self.query(&sql, [state.as_str()])
    }

    fn list_by_ids(&self, ids: &[ReferenceId]) -> CoreResult<Vec<Reference>> {
        let mut references = Vec::with_capacity(ids.len());
        for id in ids {
            let reference = self.get(*id)?.ok_or(CoreError::NotFound {
                kind: "reference",
                id: *id,
            })?;
            references.push(reference);
        }
        Ok(references)
    }

    fn dedup_population(&self) -> CoreResult<Vec<DedupRecord>> {
        let sql = format!(
            "{REFERENCE_SELECT_SQL} WHERE merged_into IS NULL ORDER BY reference_uuid ASC;"
        );
        Ok(self
            .query(&sql, [])?
            .iter()
            .map(DedupRecord::from_reference)
            .collect())
    }
}

impl EntityStore<Reference> for SqliteReferenceRepository<'_> {
    fn load(&self, id: ReferenceId) -> CoreResult<Option<Reference>> {
        self.get(id)
    }

    fn save(&self, entity: &Reference) -> CoreResult<()> {
        self.update(entity)
    }
}

struct RawReference {
    reference_uuid: String,
    batch_uuid: Option<String>,
    record_index: i64,
    title: String,
    authors_json: String,
    year_json: String,
    source_kind: Option<String>,
    source_value: Option<String>,
    journal: Option<String>,
    abstract_text: Option<String>,
    url: Option<String>,
    keywords_json: String,
    title_tokens_json: String,
    author_keys_json: String,
    raw_fields_json: String,
    state: String,
    cluster_uuid: Option<String>,
    merged_into: Option<String>,
    needs_help: i64,
    version: u32,
    imported_at: i64,
}

impl RawReference {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            reference_uuid: row.get("reference_uuid")?,
            batch_uuid: row.get("batch_uuid")?,
            record_index: row.get("record_index")?,
            title: row.get("title")?,
            authors_json: row.get("authors_json")?,
            year_json: row.get("year_json")?,
            source_kind: row.get("source_kind")?,
            source_value: row.get("source_value")?,
            journal: row.get("journal")?,
            abstract_text: row.get("abstract_text")?,
            url: row.get("url")?,
            keywords_json: row.get("keywords_json")?,
            title_tokens_json: row.get("title_tokens_json")?,
            author_keys_json: row.get("author_keys_json")?,
            raw_fields_json: row.get("raw_fields_json")?,
            state: row.get("state")?,
            cluster_uuid: row.get("cluster_uuid")?,
            merged_into: row.get("merged_into")?,
            needs_help: row.get("needs_help")?,
            version: row.get("version")?,
            imported_at: row.get("imported_at")?,
        })
    }

    fn into_reference(self) -> CoreResult<Reference> {
        let state = ReferenceState::parse(&self.state).ok_or_else(|| {
            CoreError::InvalidData(format!("unknown reference state `{}`", self.state))
        })?;
        let source_id = match (self.source_kind, self.source_value) {
            (Some(kind), Some(value)) => Some(SourceId::from_parts(&kind, value).ok_or_else(
                || CoreError::InvalidData(format!("unknown source kind `{kind}`")),
            )?),
            _ => None,
        };
        let record_index = usize::try_from(self.record_index).map_err(|_| {
            CoreError::InvalidData(format!("negative record index {}", self.record_index))
        })?;

        Ok(Reference {
            id: parse_uuid(&self.reference_uuid)?,
            title: self.title,
            authors: from_json("authors_json", &self.authors_json)?,
            year: from_json("year_json", &self.year_json)?,
            source_id,
            journal: self.journal,
            abstract_text: self.abstract_text,
            url: self.url,
            keywords: from_json("keywords_json", &self.keywords_json)?,
            normalized: crate::model::reference::NormalizedFields {
                title_tokens: from_json("title_tokens_json", &self.title_tokens_json)?,
                author_keys: from_json("author_keys_json", &self.author_keys_json)?,
            },
            provenance: Provenance {
                batch_id: parse_optional_uuid(self.batch_uuid)?,
                record_index,
                raw_fields: from_json("raw_fields_json", &self.raw_fields_json)?,
                imported_at: self.imported_at,
            },
            state,
            cluster_id: parse_optional_uuid(self.cluster_uuid)?,
            merged_into: parse_optional_uuid(self.merged_into)?,
            needs_help: self.needs_help != 0,
            version: self.version,
        })
    }
}
