//! Schema migrations for the reference, document and ledger tables.
//!
//! # Responsibility
//! - Name each schema step and keep them in application order.
//! - Bring a database from its recorded version to the latest one in a
//!   single transaction.
//!
//! # Invariants
//! - Versions start at 1 and increase by exactly 1 per step.
//! - `PRAGMA user_version` always equals the last applied step.
//! - A step that leaves dangling references (cluster members, revisions of
//!   unknown entities) is rolled back with the rest of the batch.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::{Connection, Transaction};

/// One named schema step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "references",
        sql: include_str!("0001_references.sql"),
    },
    Migration {
        version: 2,
        name: "documents",
        sql: include_str!("0002_documents.sql"),
    },
    Migration {
        version: 3,
        name: "ledger",
        sql: include_str!("0003_ledger.sql"),
    },
];

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Steps newer than `version`, in application order.
pub fn pending_after(version: u32) -> &'static [Migration] {
    let start = MIGRATIONS.partition_point(|migration| migration.version <= version);
    &MIGRATIONS[start..]
}

/// Applies every pending step and checks foreign keys before committing.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let current = schema_version(conn)?;
    let latest = latest_version();
    if current > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current,
            latest_supported: latest,
        });
    }

    let pending = pending_after(current);
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in pending {
        apply_step(&tx, migration)?;
    }
    check_foreign_keys(&tx)?;
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={} steps={}",
        current,
        latest,
        pending.len()
    );
    Ok(())
}

pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?)
}

fn apply_step(tx: &Transaction<'_>, migration: &Migration) -> DbResult<()> {
    tx.execute_batch(migration.sql)?;
    tx.pragma_update(None, "user_version", migration.version)?;
    info!(
        "event=db_migrate module=db status=applied version={} name={}",
        migration.version, migration.name
    );
    Ok(())
}

fn check_foreign_keys(tx: &Transaction<'_>) -> DbResult<()> {
    let mut stmt = tx.prepare("PRAGMA foreign_key_check;")?;
    let mut rows = stmt.query([])?;
    if let Some(row) = rows.next()? {
        return Err(DbError::ForeignKeyViolation {
            table: row.get(0)?,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{apply_migrations, latest_version, pending_after, schema_version, MIGRATIONS};
    use crate::db::DbError;
    use rusqlite::Connection;
    use std::collections::BTreeSet;

    #[test]
    fn versions_are_contiguous_and_names_unique() {
        for (index, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, index + 1);
        }
        let names: BTreeSet<&str> = MIGRATIONS.iter().map(|migration| migration.name).collect();
        assert_eq!(names.len(), MIGRATIONS.len());
        assert_eq!(latest_version(), 3);
    }

    #[test]
    fn pending_after_skips_applied_steps() {
        let names: Vec<&str> = pending_after(1).iter().map(|migration| migration.name).collect();
        assert_eq!(names, vec!["documents", "ledger"]);
        assert_eq!(pending_after(0).len(), MIGRATIONS.len());
        assert!(pending_after(latest_version()).is_empty());
    }

    #[test]
    fn partial_schema_is_completed_from_its_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();

        apply_migrations(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), latest_version());
        let summaries: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'summaries';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(summaries, 1);
    }

    #[test]
    fn dangling_cluster_member_rolls_back_the_batch() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute_batch(
            "INSERT INTO duplicate_clusters (cluster_uuid, status, created_at)
             VALUES ('c1', 'unresolved', 0);
             INSERT INTO cluster_members (cluster_uuid, reference_uuid)
             VALUES ('c1', 'missing-reference');",
        )
        .unwrap();

        let err = apply_migrations(&mut conn).unwrap_err();
        match err {
            DbError::ForeignKeyViolation { table } => assert_eq!(table, "cluster_members"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(schema_version(&conn).unwrap(), 1);
    }
}
