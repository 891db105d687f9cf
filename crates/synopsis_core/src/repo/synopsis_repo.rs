//! Synopsis repository contract and SQLite implementation.
//!
//! # Invariants
//! - The outline is stored already canonicalized; reads do not re-sort.

use crate::error::{CoreError, CoreResult};
use crate::model::synopsis::{Synopsis, SynopsisId};
use crate::model::workflow::SynopsisState;
use crate::repo::{ensure_updated, from_json, parse_optional_uuid, parse_uuid, to_json, EntityStore};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

const SYNOPSIS_SELECT_SQL: &str = "SELECT
    synopsis_uuid,
    title,
    outline_json,
    protocol_uuid,
    constituents_json,
    state,
    version
FROM synopses";

pub trait SynopsisRepository {
    fn insert(&self, synopsis: &Synopsis) -> CoreResult<()>;
    fn get(&self, id: SynopsisId) -> CoreResult<Option<Synopsis>>;
    /// Writes outline, protocol link, constituents, state and version.
    fn update(&self, synopsis: &Synopsis) -> CoreResult<()>;
    fn list_by_state(&self, state: SynopsisState) -> CoreResult<Vec<Synopsis>>;
}

pub struct SqliteSynopsisRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSynopsisRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> CoreResult<Vec<Synopsis>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawSynopsis::from_row)?;
        let mut synopses = Vec::new();
        for row in rows {
            synopses.push(row?.into_synopsis()?);
        }
        Ok(synopses)
    }
}

impl SynopsisRepository for SqliteSynopsisRepository<'_> {
    fn insert(&self, synopsis: &Synopsis) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO synopses (
                synopsis_uuid, title, outline_json, protocol_uuid, constituents_json, state, version
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                synopsis.id.to_string(),
                synopsis.title,
                to_json(&synopsis.outline)?,
                synopsis.protocol_id.map(|id| id.to_string()),
                to_json(&synopsis.constituents)?,
                synopsis.state.as_str(),
                synopsis.version,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: SynopsisId) -> CoreResult<Option<Synopsis>> {
        let sql = format!("{SYNOPSIS_SELECT_SQL} WHERE synopsis_uuid = ?1;");
        Ok(self.query(&sql, [id.to_string()])?.into_iter().next())
    }

    fn update(&self, synopsis: &Synopsis) -> CoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE synopses
             SET
                title = ?2,
                outline_json = ?3,
                protocol_uuid = ?4,
                constituents_json = ?5,
                state = ?6,
                version = ?7,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE synopsis_uuid = ?1;",
            params![
                synopsis.id.to_string(),
                synopsis.title,
                to_json(&synopsis.outline)?,
                synopsis.protocol_id.map(|id| id.to_string()),
                to_json(&synopsis.constituents)?,
                synopsis.state.as_str(),
                synopsis.version,
            ],
        )?;
        ensure_updated(changed, "synopsis", synopsis.id)
    }

    fn list_by_state(&self, state: SynopsisState) -> CoreResult<Vec<Synopsis>> {
        let sql = format!("{SYNOPSIS_SELECT_SQL} WHERE state = ?1 ORDER BY synopsis_uuid ASC;");
        self.query(&sql, [state.as_str()])
    }
}

impl EntityStore<Synopsis> for SqliteSynopsisRepository<'_> {
    fn load(&self, id: Uuid) -> CoreResult<Option<Synopsis>> {
        self.get(id)
    }

    fn save(&self, entity: &Synopsis) -> CoreResult<()> {
        self.update(entity)
    }
}

struct RawSynopsis {
    synopsis_uuid: String,
    title: String,
    outline_json: String,
    protocol_uuid: Option<String>,
    constituents_json: String,
    state: String,
    version: u32,
}

impl RawSynopsis {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            synopsis_uuid: row.get("synopsis_uuid")?,
            title: row.get("title")?,
            outline_json: row.get("outline_json")?,
            protocol_uuid: row.get("protocol_uuid")?,
            constituents_json: row.get("constituents_json")?,
            state: row.get("state")?,
            version: row.get("version")?,
        })
    }

    fn into_synopsis(self) -> CoreResult<Synopsis> {
        let state = SynopsisState::parse(&self.state).ok_or_else(|| {
            CoreError::InvalidData(format!("unknown synopsis state `{}`", self.state))
        })?;
        Ok(Synopsis {
            id: parse_uuid(&self.synopsis_uuid)?,
            title: self.title,
            outline: from_json("outline_json", &self.outline_json)?,
            protocol_id: parse_optional_uuid(self.protocol_uuid)?,
            constituents: from_json("constituents_json", &self.constituents_json)?,
            state,
            version: self.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{SqliteSynopsisRepository, SynopsisRepository};
    use crate::db::open_db_in_memory;
    use crate::model::protocol::{Protocol, ProtocolContent};
    use crate::model::synopsis::{ActionGrouping, Constituent, Synopsis};
    use crate::model::workflow::SynopsisState;
    use crate::repo::protocol_repo::{ProtocolRepository, SqliteProtocolRepository};
    use uuid::Uuid;

    #[test]
    fn synopsis_and_protocol_round_trip() {
        let conn = open_db_in_memory().unwrap();
        let synopses = SqliteSynopsisRepository::new(&conn);
        let protocols = SqliteProtocolRepository::new(&conn);

        let mut synopsis = Synopsis::new(
            "Bird conservation",
            vec![ActionGrouping {
                key: "farmland".to_string(),
                title: "Farmland".to_string(),
                position: 1,
                actions: vec!["Plant hedgerows".to_string()],
            }],
        )
        .unwrap();
        synopses.insert(&synopsis).unwrap();

        let protocol = Protocol::new_draft(
            synopsis.id,
            ProtocolContent {
                title: "Methods".to_string(),
                body: "Searched journals.".to_string(),
            },
            "amy",
        );
        protocols.insert(&protocol).unwrap();

        synopsis.protocol_id = Some(protocol.id);
        synopsis.constituents = vec![Constituent {
            summary_id: Uuid::new_v4(),
            revision_id: Uuid::new_v4(),
        }];
        synopsis.state = SynopsisState::Compiled;
        synopsis.version = 3;
        synopses.update(&synopsis).unwrap();

        assert_eq!(synopses.get(synopsis.id).unwrap(), Some(synopsis.clone()));
        assert_eq!(protocols.get(protocol.id).unwrap(), Some(protocol));
        assert_eq!(
            synopses.list_by_state(SynopsisState::Compiled).unwrap(),
            vec![synopsis]
        );
    }
}
