//! Append-only version and audit ledger.
//!
//! # Responsibility
//! - Store one immutable revision per accepted change of a managed entity.
//! - Reconstruct any prior version from a single snapshot.
//! - Record rollbacks as new revisions.
//!
//! # Invariants
//! - Per entity, `seq` is a gapless total order starting at 1.
//! - `append` computes `seq` and the prior link in one statement; a racing
//!   append on the same entity fails with `ConcurrentConflict`.
//! - Revisions are never updated or deleted (enforced by triggers too).
//! - Callers that also mutate entity rows run `append` inside their own
//!   IMMEDIATE transaction.

use crate::error::{CoreError, CoreResult};
use crate::model::now_epoch_ms;
use crate::model::revision::{changes, NewRevision, Revision, RevisionId};
use crate::model::workflow::{Actor, EntityKind, EntityRef};
use log::info;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use uuid::Uuid;

const HISTORY_PAGE_SIZE: u32 = 64;

const REVISION_COLUMNS: &str = "revision_uuid, entity_kind, entity_uuid, seq, prior_uuid,
    actor_id, transition, from_state, to_state, content_json, created_at";

/// Ledger bound to one connection or transaction.
pub struct Ledger<'conn> {
    conn: &'conn Connection,
}

impl<'conn> Ledger<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Appends one revision and returns it with its assigned `seq`.
    pub fn append(&self, revision: NewRevision) -> CoreResult<Revision> {
        let revision_id = Uuid::new_v4();
        let entity_id = revision.entity.id;
        let created_at = now_epoch_ms();
        let content_json = serde_json::to_string(&revision.content)?;

        let inserted = self.conn.execute(
            "INSERT INTO revisions (
                revision_uuid, entity_kind, entity_uuid, seq, prior_uuid,
                actor_id, transition, from_state, to_state, content_json, created_at
             )
             SELECT
                ?1, ?2, ?3,
                COALESCE(MAX(seq), 0) + 1,
                (SELECT revision_uuid FROM revisions
                  WHERE entity_uuid = ?3 ORDER BY seq DESC LIMIT 1),
                ?4, ?5, ?6, ?7, ?8, ?9
             FROM revisions
             WHERE entity_uuid = ?3;",
            params![
                revision_id.to_string(),
                revision.entity.kind.as_str(),
                entity_id.to_string(),
                revision.actor_id,
                revision.transition,
                revision.from_state,
                revision.to_state,
                content_json,
                created_at,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(err) if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                return Err(CoreError::ConcurrentConflict {
                    entity_id: Some(entity_id),
                    detail: "revision sequence already taken".to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        }

        let stored = self.get(revision_id)?.ok_or_else(|| {
            CoreError::InvalidData(format!("revision {revision_id} missing after append"))
        })?;
        info!(
            "event=ledger_append module=ledger status=ok entity_kind={} entity_id={} seq={} transition={}",
            stored.entity.kind, entity_id, stored.seq, stored.transition
        );
        Ok(stored)
    }

    pub fn get(&self, revision_id: RevisionId) -> CoreResult<Option<Revision>> {
        let sql = format!("SELECT {REVISION_COLUMNS} FROM revisions WHERE revision_uuid = ?1;");
        self.query_one(&sql, params![revision_id.to_string()])
    }

    /// Newest revision of an entity.
    pub fn latest(&self, entity_id: Uuid) -> CoreResult<Option<Revision>> {
        let sql = format!(
            "SELECT {REVISION_COLUMNS} FROM revisions
             WHERE entity_uuid = ?1 ORDER BY seq DESC LIMIT 1;"
        );
        self.query_one(&sql, params![entity_id.to_string()])
    }

    /// Number of revisions recorded for an entity.
    pub fn count(&self, entity_id: Uuid) -> CoreResult<u32> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM revisions WHERE entity_uuid = ?1;",
            [entity_id.to_string()],
            |row| row.get::<_, u32>(0),
        )?;
        Ok(count)
    }

    /// Revision with sequence number `seq`.
    pub fn revision_at(&self, entity_id: Uuid, seq: u32) -> CoreResult<Option<Revision>> {
        let sql = format!(
            "SELECT {REVISION_COLUMNS} FROM revisions WHERE entity_uuid = ?1 AND seq = ?2;"
        );
        self.query_one(&sql, params![entity_id.to_string(), seq])
    }

    /// Newest revision created at or before `timestamp_ms`.
    pub fn as_of(&self, entity_id: Uuid, timestamp_ms: i64) -> CoreResult<Option<Revision>> {
        let sql = format!(
            "SELECT {REVISION_COLUMNS} FROM revisions
             WHERE entity_uuid = ?1 AND created_at <= ?2
             ORDER BY seq DESC LIMIT 1;"
        );
        self.query_one(&sql, params![entity_id.to_string(), timestamp_ms])
    }

    /// Lazy, restartable iterator over an entity's revisions, oldest first.
    pub fn history(&self, entity_id: Uuid) -> History<'conn> {
        History::new(self.conn, entity_id, HISTORY_PAGE_SIZE)
    }

    /// Appends a `rollback` revision whose content is `restore` applied to
    /// the target revision.
    ///
    /// The workflow state does not move: `from_state` and `to_state` both
    /// carry the state of the latest revision. The entity row is not
    /// touched; the workflow engine restores it.
    pub fn rollback<F>(
        &self,
        entity: EntityRef,
        target: RevisionId,
        actor: &Actor,
        restore: F,
    ) -> CoreResult<Revision>
    where
        F: FnOnce(&Revision) -> CoreResult<serde_json::Value>,
    {
        let target_revision = self
            .get(target)?
            .filter(|revision| revision.entity.id == entity.id)
            .ok_or(CoreError::UnknownRevision {
                entity_id: entity.id,
                revision_id: target,
            })?;
        let current_state = self
            .latest(entity.id)?
            .map(|revision| revision.to_state)
            .ok_or_else(|| CoreError::InvalidData(format!("entity {} has no revisions", entity.id)))?;
        let content = restore(&target_revision)?;

        self.append(NewRevision {
            entity,
            actor_id: actor.id.clone(),
            transition: changes::ROLLBACK.to_string(),
            from_state: Some(current_state.clone()),
            to_state: current_state,
            content,
        })
    }

    fn query_one(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> CoreResult<Option<Revision>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt.query_row(params, RawRevision::from_row).optional()?;
        raw.map(RawRevision::into_revision).transpose()
    }
}

/// Decodes a revision snapshot into an entity type.
pub fn snapshot_of<T: DeserializeOwned>(revision: &Revision) -> CoreResult<T> {
    Ok(serde_json::from_value(revision.content.clone())?)
}

/// Paged iterator over one entity's revision chain.
pub struct History<'conn> {
    conn: &'conn Connection,
    entity_id: Uuid,
    page_size: u32,
    next_seq: u32,
    buffer: VecDeque<Revision>,
    exhausted: bool,
}

impl<'conn> History<'conn> {
    fn new(conn: &'conn Connection, entity_id: Uuid, page_size: u32) -> Self {
        Self {
            conn,
            entity_id,
            page_size: page_size.max(1),
            next_seq: 1,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Rewinds to the first revision; subsequent pages see new appends.
    pub fn restart(&mut self) {
        self.next_seq = 1;
        self.buffer.clear();
        self.exhausted = false;
    }

    fn fetch_page(&mut self) -> CoreResult<()> {
        let sql = format!(
            "SELECT {REVISION_COLUMNS} FROM revisions
             WHERE entity_uuid = ?1 AND seq >= ?2
             ORDER BY seq ASC LIMIT ?3;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![self.entity_id.to_string(), self.next_seq, self.page_size],
            RawRevision::from_row,
        )?;
        let mut fetched = 0u32;
        for row in rows {
            let revision = row?.into_revision()?;
            self.next_seq = revision.seq + 1;
            self.buffer.push_back(revision);
            fetched += 1;
        }
        if fetched < self.page_size {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for History<'_> {
    type Item = CoreResult<Revision>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

struct RawRevision {
    revision_uuid: String,
    entity_kind: String,
    entity_uuid: String,
    seq: u32,
    prior_uuid: Option<String>,
    actor_id: String,
    transition: String,
    from_state: Option<String>,
    to_state: String,
    content_json: String,
    created_at: i64,
}

impl RawRevision {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            revision_uuid: row.get("revision_uuid")?,
            entity_kind: row.get("entity_kind")?,
            entity_uuid: row.get("entity_uuid")?,
            seq: row.get("seq")?,
            prior_uuid: row.get("prior_uuid")?,
            actor_id: row.get("actor_id")?,
            transition: row.get("transition")?,
            from_state: row.get("from_state")?,
            to_state: row.get("to_state")?,
            content_json: row.get("content_json")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_revision(self) -> CoreResult<Revision> {
        let kind = EntityKind::parse(&self.entity_kind).ok_or_else(|| {
            CoreError::InvalidData(format!("unknown entity kind `{}`", self.entity_kind))
        })?;
        Ok(Revision {
            id: parse_uuid(&self.revision_uuid)?,
            entity: EntityRef::new(kind, parse_uuid(&self.entity_uuid)?),
            seq: self.seq,
            prior_id: self.prior_uuid.as_deref().map(parse_uuid).transpose()?,
            actor_id: self.actor_id,
            transition: self.transition,
            from_state: self.from_state,
            to_state: self.to_state,
            content: serde_json::from_str(&self.content_json)?,
            created_at: self.created_at,
        })
    }
}

pub(crate) fn parse_uuid(value: &str) -> CoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|err| CoreError::InvalidData(format!("invalid uuid `{value}`: {err}")))
}

#[cfg(test)]
mod tests {
    use super::Ledger;
    use crate::db::open_db_in_memory;
    use crate::error::CoreError;
    use crate::model::revision::NewRevision;
    use crate::model::workflow::{Actor, EntityKind, EntityRef};
    use serde_json::json;
    use uuid::Uuid;

    fn revision(entity: EntityRef, to_state: &str, body: &str) -> NewRevision {
        NewRevision {
            entity,
            actor_id: "author-1".to_string(),
            transition: "edit".to_string(),
            from_state: Some("draft".to_string()),
            to_state: to_state.to_string(),
            content: json!({ "body": body }),
        }
    }

    #[test]
    fn append_assigns_gapless_sequence_and_prior_links() {
        let conn = open_db_in_memory().unwrap();
        let ledger = Ledger::new(&conn);
        let entity = EntityRef::new(EntityKind::Summary, Uuid::new_v4());

        let first = ledger.append(revision(entity, "draft", "v1")).unwrap();
        let second = ledger.append(revision(entity, "draft", "v2")).unwrap();

        assert_eq!(first.seq, 1);
        assert_eq!(first.prior_id, None);
        assert_eq!(second.seq, 2);
        assert_eq!(second.prior_id, Some(first.id));
    }

    #[test]
    fn history_pages_restart_from_the_beginning() {
        let conn = open_db_in_memory().unwrap();
        let ledger = Ledger::new(&conn);
        let entity = EntityRef::new(EntityKind::Protocol, Uuid::new_v4());
        for index in 0..70 {
            ledger
                .append(revision(entity, "draft", &format!("v{index}")))
                .unwrap();
        }

        let mut history = ledger.history(entity.id);
        let seqs: Vec<u32> = history.by_ref().map(|r| r.unwrap().seq).collect();
        assert_eq!(seqs, (1..=70).collect::<Vec<_>>());
        assert!(history.next().is_none());

        history.restart();
        assert_eq!(history.next().unwrap().unwrap().seq, 1);
    }

    #[test]
    fn rollback_rejects_revision_from_another_entity() {
        let conn = open_db_in_memory().unwrap();
        let ledger = Ledger::new(&conn);
        let first = EntityRef::new(EntityKind::Summary, Uuid::new_v4());
        let other = EntityRef::new(EntityKind::Summary, Uuid::new_v4());
        ledger.append(revision(first, "draft", "a")).unwrap();
        let foreign = ledger.append(revision(other, "draft", "b")).unwrap();

        let err = ledger
            .rollback(first, foreign.id, &Actor::system(), |target| Ok(target.content.clone()))
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownRevision { .. }));
        assert_eq!(ledger.count(first.id).unwrap(), 1);
    }

    #[test]
    fn rollback_keeps_latest_state() {
        let conn = open_db_in_memory().unwrap();
        let ledger = Ledger::new(&conn);
        let entity = EntityRef::new(EntityKind::Summary, Uuid::new_v4());
        let first = ledger.append(revision(entity, "draft", "first")).unwrap();
        ledger.append(revision(entity, "approved", "second")).unwrap();

        let rolled = ledger
            .rollback(entity, first.id, &Actor::system(), |target| Ok(target.content.clone()))
            .unwrap();
        assert_eq!(rolled.seq, 3);
        assert_eq!(rolled.from_state.as_deref(), Some("approved"));
        assert_eq!(rolled.to_state, "approved");
        assert_eq!(rolled.content, first.content);
    }

    #[test]
    fn revisions_cannot_be_rewritten() {
        let conn = open_db_in_memory().unwrap();
        let ledger = Ledger::new(&conn);
        let entity = EntityRef::new(EntityKind::Synopsis, Uuid::new_v4());
        ledger.append(revision(entity, "assembling", "x")).unwrap();

        assert!(conn
            .execute("UPDATE revisions SET actor_id = 'mallory';", [])
            .is_err());
        assert!(conn.execute("DELETE FROM revisions;", []).is_err());
    }
}
