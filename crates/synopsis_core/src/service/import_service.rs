//! Batch import use-case.
//!
//! # Responsibility
//! - Normalize raw records, quarantine failures and persist the rest as
//!   `imported` references with revision 1.
//! - Place every new reference into at most one unresolved duplicate
//!   cluster.
//!
//! # Invariants
//! - The population snapshot is read inside the same IMMEDIATE transaction
//!   that inserts the reference, so a scan never sees a half-written record.
//! - A failed record never stops the batch; cancellation and timeouts stop
//!   between records and keep everything already committed.
//! - Record order in the report equals input order.

use crate::config::CoreConfig;
use crate::control::OperationControl;
use crate::dedup::index::PopulationIndex;
use crate::dedup::{DedupRecord, DuplicateResolver};
use crate::error::{CoreError, CoreResult};
use crate::import::{Normalizer, RawRecord, RisReader};
use crate::ledger::Ledger;
use crate::model::batch::{BatchDescriptor, BatchId, BatchTermination, ImportBatch, QuarantinedRecord};
use crate::model::cluster::ClusterId;
use crate::model::now_epoch_ms;
use crate::model::reference::{Reference, ReferenceDraft, ReferenceId};
use crate::model::revision::{changes, RevisionId};
use crate::model::workflow::Actor;
use crate::repo::batch_repo::{BatchRepository, SqliteBatchRepository};
use crate::repo::cluster_repo::{ClusterRepository, SqliteClusterRepository};
use crate::repo::reference_repo::{ReferenceRepository, SqliteReferenceRepository};
use crate::workflow::engine::record_change;
use crate::workflow::WorkflowEngine;
use log::{info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use std::io::BufRead;
use uuid::Uuid;

/// What happened to one input record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Imported {
        reference_id: ReferenceId,
        revision_id: RevisionId,
        /// Unresolved cluster holding the record, empty for standalone records.
        clusters: Vec<ClusterId>,
    },
    /// Normalization failed; the raw record is kept in quarantine.
    Quarantined { reason_code: String, message: String },
    /// Storage rejected the record; nothing was written for it.
    Failed { reason_code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordResult {
    pub record_index: usize,
    #[serde(flatten)]
    pub outcome: RecordOutcome,
}

/// Per-record report of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub batch: ImportBatch,
    pub records: Vec<RecordResult>,
}

impl ImportReport {
    pub fn batch_id(&self) -> BatchId {
        self.batch.id
    }

    /// `Cancelled`/`Timeout` error describing an early stop, if any.
    pub fn interruption(&self) -> Option<CoreError> {
        let processed = self.batch.processed;
        match self.batch.termination {
            BatchTermination::Cancelled => Some(CoreError::Cancelled { processed }),
            BatchTermination::TimedOut => Some(CoreError::Timeout { processed }),
            BatchTermination::Running | BatchTermination::Completed => None,
        }
    }

    pub fn imported_ids(&self) -> Vec<ReferenceId> {
        self.records
            .iter()
            .filter_map(|record| match record.outcome {
                RecordOutcome::Imported { reference_id, .. } => Some(reference_id),
                _ => None,
            })
            .collect()
    }
}

/// Import pipeline bound to one engine.
pub struct ImportService<'a> {
    engine: &'a WorkflowEngine,
    normalizer: Normalizer,
    resolver: DuplicateResolver,
    timeout_ms: Option<u64>,
}

impl<'a> ImportService<'a> {
    pub fn new(config: &CoreConfig, engine: &'a WorkflowEngine) -> Self {
        Self {
            engine,
            normalizer: Normalizer::new(&config.dedup),
            resolver: DuplicateResolver::new(config.dedup.clone()),
            timeout_ms: config.import.timeout_ms,
        }
    }

    /// Configured import budget; callers combine it with their own token.
    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    /// Imports already-split records as one batch.
    pub fn import_records(
        &self,
        conn: &Connection,
        descriptor: BatchDescriptor,
        records: impl IntoIterator<Item = RawRecord>,
        actor: &Actor,
        control: &OperationControl,
    ) -> CoreResult<ImportReport> {
        self.run(conn, descriptor, records.into_iter().map(Ok), actor, control)
    }

    /// Imports a tagged interchange stream as one batch.
    ///
    /// An unreadable stream stops the batch as `cancelled` and returns the
    /// I/O error; records committed before it stay.
    pub fn import_stream<R: BufRead>(
        &self,
        conn: &Connection,
        descriptor: BatchDescriptor,
        reader: R,
        actor: &Actor,
        control: &OperationControl,
    ) -> CoreResult<ImportReport> {
        let records = RisReader::new(reader).map(|item| item.map_err(CoreError::from));
        self.run(conn, descriptor, records, actor, control)
    }

    fn run(
        &self,
        conn: &Connection,
        descriptor: BatchDescriptor,
        records: impl Iterator<Item = CoreResult<RawRecord>>,
        actor: &Actor,
        control: &OperationControl,
    ) -> CoreResult<ImportReport> {
        let batches = SqliteBatchRepository::new(conn);
        let mut batch = ImportBatch {
            id: Uuid::new_v4(),
            descriptor,
            processed: 0,
            imported: 0,
            quarantined: 0,
            termination: BatchTermination::Running,
            created_at: now_epoch_ms(),
        };
        batches.create(&batch)?;
        info!(
            "event=import_batch module=import status=start batch_id={}",
            batch.id
        );

        let mut results = Vec::new();
        let mut stream_error = None;
        batch.termination = BatchTermination::Completed;
        for (record_index, item) in records.enumerate() {
            if let Err(err) = control.checkpoint(batch.processed) {
                batch.termination = match err {
                    CoreError::Timeout { .. } => BatchTermination::TimedOut,
                    _ => BatchTermination::Cancelled,
                };
                break;
            }
            let record = match item {
                Ok(record) => record,
                Err(err) => {
                    batch.termination = BatchTermination::Cancelled;
                    stream_error = Some(err);
                    break;
                }
            };

            let outcome = self.import_one(conn, &batches, batch.id, record_index, &record, actor);
            match &outcome {
                RecordOutcome::Imported { .. } => batch.imported += 1,
                RecordOutcome::Quarantined { .. } => batch.quarantined += 1,
                RecordOutcome::Failed { .. } => {}
            }
            batch.processed += 1;
            results.push(RecordResult {
                record_index,
                outcome,
            });
        }

        batches.finish(&batch)?;
        info!(
            "event=import_batch module=import status={} batch_id={} processed={} imported={} quarantined={}",
            batch.termination.as_str(),
            batch.id,
            batch.processed,
            batch.imported,
            batch.quarantined
        );
        if let Some(err) = stream_error {
            return Err(err);
        }
        Ok(ImportReport {
            batch,
            records: results,
        })
    }

    fn import_one(
        &self,
        conn: &Connection,
        batches: &SqliteBatchRepository<'_>,
        batch_id: BatchId,
        record_index: usize,
        record: &RawRecord,
        actor: &Actor,
    ) -> RecordOutcome {
        let draft = match self.normalizer.normalize(record_index, record) {
            Ok(draft) => draft,
            Err(err) => {
                let reason_code = err.reason_code().to_string();
                let message = err.to_string();
                warn!(
                    "event=import_record module=import status=quarantined batch_id={} record_index={} reason={}",
                    batch_id, record_index, reason_code
                );
                let quarantined = batches.quarantine(&QuarantinedRecord {
                    batch_id,
                    record_index,
                    reason_code: reason_code.clone(),
                    message: message.clone(),
                    raw_fields: record.lossy_fields(),
                });
                if let Err(storage) = quarantined {
                    return failed(batch_id, record_index, storage);
                }
                return RecordOutcome::Quarantined {
                    reason_code,
                    message,
                };
            }
        };

        match self.persist(conn, batch_id, record_index, draft, actor) {
            Ok(outcome) => outcome,
            Err(err) => failed(batch_id, record_index, err),
        }
    }

    fn persist(
        &self,
        conn: &Connection,
        batch_id: BatchId,
        record_index: usize,
        draft: ReferenceDraft,
        actor: &Actor,
    ) -> CoreResult<RecordOutcome> {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let references = SqliteReferenceRepository::new(&tx);
        let clusters = SqliteClusterRepository::new(&tx);
        let now = now_epoch_ms();

        let population = PopulationIndex::build(references.dedup_population()?);
        let mut reference = Reference::from_draft(draft, Some(batch_id), record_index, now);
        let incoming = DedupRecord::from_reference(&reference);
        let matches = self.resolver.scan(&incoming, &population);
        let matched: Vec<Uuid> = matches
            .iter()
            .map(|pair| if pair.a == reference.id { pair.b } else { pair.a })
            .collect();
        let existing = clusters.unresolved_containing(&matched)?;
        let placement = self.resolver.place(reference.id, matches, &existing, now);

        references.insert(&reference)?;
        let revision = record_change(
            &Ledger::new(&tx),
            &references,
            &mut reference,
            &actor.id,
            changes::IMPORT,
            None,
        )?;
        if let Some(cluster) = placement.cluster.as_ref() {
            if placement.created {
                clusters.insert(cluster)?;
            } else {
                clusters.extend(cluster.id, &cluster.pairs)?;
            }
            for absorbed in &placement.absorbed {
                clusters.absorb(*absorbed, cluster.id, now)?;
            }
        }
        tx.commit()?;

        info!(
            "event=import_record module=import status=ok batch_id={} record_index={} reference_id={} clusters={} absorbed={}",
            batch_id,
            record_index,
            reference.id,
            placement.cluster_ids().len(),
            placement.absorbed.len()
        );
        self.engine.publish(&revision);
        Ok(RecordOutcome::Imported {
            reference_id: reference.id,
            revision_id: revision.id,
            clusters: placement.cluster_ids(),
        })
    }
}

fn failed(batch_id: BatchId, record_index: usize, err: CoreError) -> RecordOutcome {
    warn!(
        "event=import_record module=import status=error batch_id={} record_index={} reason={}",
        batch_id,
        record_index,
        err.reason_code()
    );
    RecordOutcome::Failed {
        reason_code: err.reason_code().to_string(),
        message: err.to_string(),
    }
}
