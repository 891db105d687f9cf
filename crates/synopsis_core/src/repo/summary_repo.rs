//! Summary repository contract and SQLite implementation.
//!
//! # Invariants
//! - `action` is duplicated out of `metadata_json` so assembly can select by
//!   outline action without decoding every row.

use crate::error::{CoreError, CoreResult};
use crate::model::summary::{Summary, SummaryId};
use crate::model::workflow::DocumentState;
use crate::repo::{ensure_updated, from_json, parse_uuid, to_json, EntityStore};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

const SUMMARY_SELECT_SQL: &str = "SELECT
    summary_uuid,
    reference_uuid,
    metadata_json,
    body,
    state,
    author,
    version
FROM summaries";

pub trait SummaryRepository {
    fn insert(&self, summary: &Summary) -> CoreResult<()>;
    fn get(&self, id: SummaryId) -> CoreResult<Option<Summary>>;
    /// Writes content, state and version.
    fn update(&self, summary: &Summary) -> CoreResult<()>;
    fn list_by_state(&self, state: DocumentState) -> CoreResult<Vec<Summary>>;
    /// Summaries of any state whose action is one of `actions`.
    fn list_by_actions(&self, actions: &[String]) -> CoreResult<Vec<Summary>>;
    fn list_for_reference(&self, reference_id: Uuid) -> CoreResult<Vec<Summary>>;
}

pub struct SqliteSummaryRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSummaryRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> CoreResult<Vec<Summary>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawSummary::from_row)?;
        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?.into_summary()?);
        }
        Ok(summaries)
    }
}

impl SummaryRepository for SqliteSummaryRepository<'_> {
    fn insert(&self, summary: &Summary) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO summaries (
                summary_uuid, reference_uuid, action, metadata_json, body, state, author, version
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                summary.id.to_string(),
                summary.reference_id.to_string(),
                summary.metadata.action,
                to_json(&summary.metadata)?,
                summary.body,
                summary.state.as_str(),
                summary.author,
                summary.version,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: SummaryId) -> CoreResult<Option<Summary>> {
        let sql = format!("{SUMMARY_SELECT_SQL} WHERE summary_uuid = ?1;");
        Ok(self.query(&sql, [id.to_string()])?.into_iter().next())
    }

    fn update(&self, summary: &Summary) -> CoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE summaries
             SET
                reference_uuid = ?2,
                action = ?3,
                metadata_json = ?4,
                body = ?5,
                state = ?6,
                version = ?7,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE summary_uuid = ?1;",
            params![
                summary.id.to_string(),
                summary.reference_id.to_string(),
                summary.metadata.action,
                to_json(&summary.metadata)?,
                summary.body,
                summary.state.as_str(),
                summary.version,
            ],
        )?;
        ensure_updated(changed, "summary", summary.id)
    }

    fn list_by_state(&self, state: DocumentState) -> CoreResult<Vec<Summary>> {
        let sql = format!("{SUMMARY_SELECT_SQL} WHERE state = ?1 ORDER BY summary_uuid ASC;");
        self.query(&sql, [state.as_str()])
    }

    fn list_by_actions(&self, actions: &[String]) -> CoreResult<Vec<Summary>> {
        let sql = format!("{SUMMARY_SELECT_SQL} WHERE action = ?1 ORDER BY summary_uuid ASC;");
        let mut summaries = Vec::new();
        for action in actions {
            for summary in self.query(&sql, [action])? {
                if !summaries.iter().any(|known: &Summary| known.id == summary.id) {
                    summaries.push(summary);
                }
            }
        }
        summaries.sort_by_key(|summary| summary.id);
        Ok(summaries)
    }

    fn list_for_reference(&self, reference_id: Uuid) -> CoreResult<Vec<Summary>> {
        let sql =
            format!("{SUMMARY_SELECT_SQL} WHERE reference_uuid = ?1 ORDER BY summary_uuid ASC;");
        self.query(&sql, [reference_id.to_string()])
    }
}

impl EntityStore<Summary> for SqliteSummaryRepository<'_> {
    fn load(&self, id: Uuid) -> CoreResult<Option<Summary>> {
        self.get(id)
    }

    fn save(&self, entity: &Summary) -> CoreResult<()> {
        self.update(entity)
    }
}

struct RawSummary {
    summary_uuid: String,
    reference_uuid: String,
    metadata_json: String,
    body: String,
    state: String,
    author: String,
    version: u32,
}

impl RawSummary {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            summary_uuid: row.get("summary_uuid")?,
            reference_uuid: row.get("reference_uuid")?,
            metadata_json: row.get("metadata_json")?,
            body: row.get("body")?,
            state: row.get("state")?,
            author: row.get("author")?,
            version: row.get("version")?,
        })
    }

    fn into_summary(self) -> CoreResult<Summary> {
        let state = DocumentState::parse(&self.state).ok_or_else(|| {
            CoreError::InvalidData(format!("unknown summary state `{}`", self.state))
        })?;
        Ok(Summary {
            id: parse_uuid(&self.summary_uuid)?,
            reference_id: parse_uuid(&self.reference_uuid)?,
            metadata: from_json("metadata_json", &self.metadata_json)?,
            body: self.body,
            state,
            author: self.author,
            version: self.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{SqliteSummaryRepository, SummaryRepository};
    use crate::db::open_db_in_memory;
    use crate::model::reference::{NormalizedFields, Reference, ReferenceDraft, YearValue};
    use crate::model::summary::{Summary, SummaryContent, SummaryMetadata};
    use crate::model::workflow::DocumentState;
    use crate::repo::reference_repo::{ReferenceRepository, SqliteReferenceRepository};
    use rusqlite::Connection;

    fn seed_reference(conn: &Connection) -> Reference {
        let reference = Reference::from_draft(
            ReferenceDraft {
                title: "Hedgerow planting".to_string(),
                authors: vec!["Lee, K.".to_string()],
                year: YearValue::Exact { year: 2015 },
                source_id: None,
                journal: None,
                abstract_text: None,
                url: None,
                keywords: Vec::new(),
                normalized: NormalizedFields::default(),
                raw_fields: Vec::new(),
            },
            None,
            0,
            1,
        );
        SqliteReferenceRepository::new(conn).insert(&reference).unwrap();
        reference
    }

    fn content(action: &str) -> SummaryContent {
        SummaryContent {
            metadata: SummaryMetadata {
                action: action.to_string(),
                evidence_strength: Some(60),
                ..SummaryMetadata::default()
            },
            body: "Planting hedgerows increased farmland bird abundance.".to_string(),
        }
    }

    #[test]
    fn update_rewrites_action_column() {
        let conn = open_db_in_memory().unwrap();
        let reference = seed_reference(&conn);
        let repo = SqliteSummaryRepository::new(&conn);
        let mut summary = Summary::new_draft(reference.id, content("Plant hedgerows"), "amy");
        repo.insert(&summary).unwrap();

        summary.apply_content(content("Manage hedgerows"));
        summary.state = DocumentState::Submitted;
        summary.version = 2;
        repo.update(&summary).unwrap();

        let by_action = repo
            .list_by_actions(&["Manage hedgerows".to_string()])
            .unwrap();
        assert_eq!(by_action, vec![summary.clone()]);
        assert!(repo
            .list_by_actions(&["Plant hedgerows".to_string()])
            .unwrap()
            .is_empty());
        assert_eq!(repo.list_by_state(DocumentState::Submitted).unwrap().len(), 1);
        assert_eq!(repo.list_for_reference(reference.id).unwrap().len(), 1);
    }

    #[test]
    fn summary_requires_existing_reference_row() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteSummaryRepository::new(&conn);
        let orphan = Summary::new_draft(uuid::Uuid::new_v4(), content("Any"), "amy");
        assert!(repo.insert(&orphan).is_err());
    }
}
