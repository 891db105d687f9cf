//! Import batch and quarantine repository.
//!
//! # Invariants
//! - A batch row exists before any reference or quarantine row points at it.
//! - Counters are written by `finish`; they are monotonic per run.

use crate::error::{CoreError, CoreResult};
use crate::model::batch::{BatchDescriptor, BatchId, BatchTermination, ImportBatch, QuarantinedRecord};
use crate::repo::{ensure_updated, from_json, parse_uuid, to_json};
use rusqlite::{params, Connection, OptionalExtension, Row};

pub trait BatchRepository {
    fn create(&self, batch: &ImportBatch) -> CoreResult<()>;
    fn get(&self, id: BatchId) -> CoreResult<Option<ImportBatch>>;
    /// Stores final counters and termination.
    fn finish(&self, batch: &ImportBatch) -> CoreResult<()>;
    fn quarantine(&self, record: &QuarantinedRecord) -> CoreResult<()>;
    fn list_quarantined(&self, batch_id: BatchId) -> CoreResult<Vec<QuarantinedRecord>>;
}

pub struct SqliteBatchRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteBatchRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl BatchRepository for SqliteBatchRepository<'_> {
    fn create(&self, batch: &ImportBatch) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO import_batches (
                batch_uuid, label, source_label, search_date_start, search_date_end,
                processed, imported, quarantined, termination, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                batch.id.to_string(),
                batch.descriptor.label,
                batch.descriptor.source_label,
                batch.descriptor.search_date_start,
                batch.descriptor.search_date_end,
                batch.processed as i64,
                batch.imported as i64,
                batch.quarantined as i64,
                batch.termination.as_str(),
                batch.created_at,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: BatchId) -> CoreResult<Option<ImportBatch>> {
        let raw = self
            .conn
            .query_row(
                "SELECT batch_uuid, label, source_label, search_date_start, search_date_end,
                        processed, imported, quarantined, termination, created_at
                 FROM import_batches WHERE batch_uuid = ?1;",
                [id.to_string()],
                RawBatch::from_row,
            )
            .optional()?;
        raw.map(RawBatch::into_batch).transpose()
    }

    fn finish(&self, batch: &ImportBatch) -> CoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE import_batches
             SET processed = ?2, imported = ?3, quarantined = ?4, termination = ?5
             WHERE batch_uuid = ?1;",
            params![
                batch.id.to_string(),
                batch.processed as i64,
                batch.imported as i64,
                batch.quarantined as i64,
                batch.termination.as_str(),
            ],
        )?;
        ensure_updated(changed, "import batch", batch.id)
    }

    fn quarantine(&self, record: &QuarantinedRecord) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO quarantined_records (
                batch_uuid, record_index, reason_code, message, raw_fields_json
             ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                record.batch_id.to_string(),
                record.record_index as i64,
                record.reason_code,
                record.message,
                to_json(&record.raw_fields)?,
            ],
        )?;
        Ok(())
    }

    fn list_quarantined(&self, batch_id: BatchId) -> CoreResult<Vec<QuarantinedRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT batch_uuid, record_index, reason_code, message, raw_fields_json
             FROM quarantined_records
             WHERE batch_uuid = ?1
             ORDER BY record_index ASC, quarantine_id ASC;",
        )?;
        let rows = stmt.query_map([batch_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (batch_uuid, record_index, reason_code, message, raw_fields_json) = row?;
            records.push(QuarantinedRecord {
                batch_id: parse_uuid(&batch_uuid)?,
                record_index: to_count(record_index)?,
                reason_code,
                message,
                raw_fields: from_json("raw_fields_json", &raw_fields_json)?,
            });
        }
        Ok(records)
    }
}

fn to_count(value: i64) -> CoreResult<usize> {
    usize::try_from(value)
        .map_err(|_| CoreError::InvalidData(format!("negative counter value {value}")))
}

struct RawBatch {
    batch_uuid: String,
    label: String,
    source_label: Option<String>,
    search_date_start: Option<String>,
    search_date_end: Option<String>,
    processed: i64,
    imported: i64,
    quarantined: i64,
    termination: String,
    created_at: i64,
}

impl RawBatch {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            batch_uuid: row.get(0)?,
            label: row.get(1)?,
            source_label: row.get(2)?,
            search_date_start: row.get(3)?,
            search_date_end: row.get(4)?,
            processed: row.get(5)?,
            imported: row.get(6)?,
            quarantined: row.get(7)?,
            termination: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_batch(self) -> CoreResult<ImportBatch> {
        let termination = BatchTermination::parse(&self.termination).ok_or_else(|| {
            CoreError::InvalidData(format!("unknown batch termination `{}`", self.termination))
        })?;
        Ok(ImportBatch {
            id: parse_uuid(&self.batch_uuid)?,
            descriptor: BatchDescriptor {
                label: self.label,
                source_label: self.source_label,
                search_date_start: self.search_date_start,
                search_date_end: self.search_date_end,
            },
            processed: to_count(self.processed)?,
            imported: to_count(self.imported)?,
            quarantined: to_count(self.quarantined)?,
            termination,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchRepository, SqliteBatchRepository};
    use crate::db::open_db_in_memory;
    use crate::model::batch::{BatchDescriptor, BatchTermination, ImportBatch, QuarantinedRecord};
    use crate::model::reference::RawField;
    use uuid::Uuid;

    #[test]
    fn batch_counters_and_quarantine_persist() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteBatchRepository::new(&conn);
        let mut batch = ImportBatch {
            id: Uuid::new_v4(),
            descriptor: BatchDescriptor {
                label: "Web of Science 2019".to_string(),
                source_label: Some("wos".to_string()),
                search_date_start: Some("2019-01-01".to_string()),
                search_date_end: None,
            },
            processed: 0,
            imported: 0,
            quarantined: 0,
            termination: BatchTermination::Running,
            created_at: 7,
        };
        repo.create(&batch).unwrap();

        repo.quarantine(&QuarantinedRecord {
            batch_id: batch.id,
            record_index: 4,
            reason_code: "malformed_record".to_string(),
            message: "missing year".to_string(),
            raw_fields: vec![RawField {
                tag: "TI".to_string(),
                value: "Untitled".to_string(),
            }],
        })
        .unwrap();

        batch.processed = 5;
        batch.imported = 4;
        batch.quarantined = 1;
        batch.termination = BatchTermination::Completed;
        repo.finish(&batch).unwrap();

        assert_eq!(repo.get(batch.id).unwrap(), Some(batch.clone()));
        let quarantined = repo.list_quarantined(batch.id).unwrap();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].record_index, 4);
        assert_eq!(quarantined[0].raw_fields[0].value, "Untitled");
    }
}
