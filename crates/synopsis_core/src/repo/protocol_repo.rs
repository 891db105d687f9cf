//! Protocol repository contract and SQLite implementation.

use crate::error::{CoreError, CoreResult};
use crate::model::protocol::{Protocol, ProtocolId};
use crate::model::workflow::DocumentState;
use crate::repo::{ensure_updated, parse_uuid, EntityStore};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

const PROTOCOL_SELECT_SQL: &str = "SELECT
    protocol_uuid,
    synopsis_uuid,
    title,
    body,
    state,
    author,
    version
FROM protocols";

pub trait ProtocolRepository {
    fn insert(&self, protocol: &Protocol) -> CoreResult<()>;
    fn get(&self, id: ProtocolId) -> CoreResult<Option<Protocol>>;
    fn update(&self, protocol: &Protocol) -> CoreResult<()>;
    fn list_by_state(&self, state: DocumentState) -> CoreResult<Vec<Protocol>>;
}

pub struct SqliteProtocolRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteProtocolRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> CoreResult<Vec<Protocol>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawProtocol::from_row)?;
        let mut protocols = Vec::new();
        for row in rows {
            protocols.push(row?.into_protocol()?);
        }
        Ok(protocols)
    }
}

impl ProtocolRepository for SqliteProtocolRepository<'_> {
    fn insert(&self, protocol: &Protocol) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO protocols (
                protocol_uuid, synopsis_uuid, title, body, state, author, version
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                protocol.id.to_string(),
                protocol.synopsis_id.to_string(),
                protocol.title,
                protocol.body,
                protocol.state.as_str(),
                protocol.author,
                protocol.version,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: ProtocolId) -> CoreResult<Option<Protocol>> {
        let sql = format!("{PROTOCOL_SELECT_SQL} WHERE protocol_uuid = ?1;");
        Ok(self.query(&sql, [id.to_string()])?.into_iter().next())
    }

    fn update(&self, protocol: &Protocol) -> CoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE protocols
             SET
                title = ?2,
                body = ?3,
                state = ?4,
                version = ?5,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE protocol_uuid = ?1;",
            params![
                protocol.id.to_string(),
                protocol.title,
                protocol.body,
                protocol.state.as_str(),
                protocol.version,
            ],
        )?;
        ensure_updated(changed, "protocol", protocol.id)
    }

    fn list_by_state(&self, state: DocumentState) -> CoreResult<Vec<Protocol>> {
        let sql = format!("{PROTOCOL_SELECT_SQL} WHERE state = ?1 ORDER BY protocol_uuid ASC;");
        self.query(&sql, [state.as_str()])
    }
}

impl EntityStore<Protocol> for SqliteProtocolRepository<'_> {
    fn load(&self, id: Uuid) -> CoreResult<Option<Protocol>> {
        self.get(id)
    }

    fn save(&self, entity: &Protocol) -> CoreResult<()> {
        self.update(entity)
    }
}

struct RawProtocol {
    protocol_uuid: String,
    synopsis_uuid: String,
    title: String,
    body: String,
    state: String,
    author: String,
    version: u32,
}

impl RawProtocol {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            protocol_uuid: row.get("protocol_uuid")?,
            synopsis_uuid: row.get("synopsis_uuid")?,
            title: row.get("title")?,
            body: row.get("body")?,
            state: row.get("state")?,
            author: row.get("author")?,
            version: row.get("version")?,
        })
    }

    fn into_protocol(self) -> CoreResult<Protocol> {
        let state = DocumentState::parse(&self.state).ok_or_else(|| {
            CoreError::InvalidData(format!("unknown protocol state `{}`", self.state))
        })?;
        Ok(Protocol {
            id: parse_uuid(&self.protocol_uuid)?,
            synopsis_id: parse_uuid(&self.synopsis_uuid)?,
            title: self.title,
            body: self.body,
            state,
            author: self.author,
            version: self.version,
        })
    }
}
