//! Duplicate cluster decisions.
//!
//! # Responsibility
//! - List and recompute duplicate proposals.
//! - Apply merge and reject decisions with one ledger revision per touched
//!   reference.
//!
//! # Invariants
//! - Decisions are role-gated by the configured cluster decision roles.
//! - A merge locks the cluster and every member before reading them.
//! - Replaying a decided cluster returns the original outcome and appends
//!   nothing.
//! - References are never deleted; merged-away members point at the survivor.
//! - Summaries of merged-away members move to the survivor in the merge
//!   transaction, one revision each.

use crate::config::CoreConfig;
use crate::dedup::index::PopulationIndex;
use crate::dedup::{choose_survivor, DedupRecord, DuplicateResolver};
use crate::error::{CoreError, CoreResult};
use crate::ledger::Ledger;
use crate::model::cluster::{ClusterId, ClusterStatus, DuplicateCluster, MergeOutcome};
use crate::model::now_epoch_ms;
use crate::model::revision::{changes, Revision};
use crate::model::workflow::{Actor, EntityKind};
use crate::repo::cluster_repo::{ClusterRepository, SqliteClusterRepository};
use crate::repo::reference_repo::{ReferenceRepository, SqliteReferenceRepository};
use crate::repo::summary_repo::{SqliteSummaryRepository, SummaryRepository};
use crate::repo::{from_json, to_json};
use crate::workflow::engine::record_change;
use crate::workflow::{ManagedEntity, WorkflowEngine};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use uuid::Uuid;

const MERGE_DECISION: &str = "merge";

pub struct ClusterService<'a> {
    engine: &'a WorkflowEngine,
    resolver: DuplicateResolver,
}

impl<'a> ClusterService<'a> {
    pub fn new(config: &CoreConfig, engine: &'a WorkflowEngine) -> Self {
        Self {
            engine,
            resolver: DuplicateResolver::new(config.dedup.clone()),
        }
    }

    pub fn get(&self, conn: &Connection, cluster_id: ClusterId) -> CoreResult<DuplicateCluster> {
        SqliteClusterRepository::new(conn)
            .get(cluster_id)?
            .ok_or(CoreError::NotFound {
                kind: "cluster",
                id: cluster_id,
            })
    }

    pub fn list(&self, conn: &Connection, status: ClusterStatus) -> CoreResult<Vec<DuplicateCluster>> {
        SqliteClusterRepository::new(conn).list_by_status(status)
    }

    /// Recomputes proposals over the current population without persisting
    /// them, e.g. after the threshold was recalibrated.
    pub fn propose_clusters(&self, conn: &Connection) -> CoreResult<Vec<DuplicateCluster>> {
        let population =
            PopulationIndex::build(SqliteReferenceRepository::new(conn).dedup_population()?);
        let proposals = self.resolver.propose_clusters(&population, now_epoch_ms());
        info!(
            "event=cluster_rescan module=dedup status=ok population={} proposals={}",
            population.len(),
            proposals.len()
        );
        Ok(proposals)
    }

    /// Merges a cluster into one canonical reference.
    ///
    /// Without an explicit survivor the most complete, then earliest
    /// imported, then smallest id member survives.
    pub fn merge(
        &self,
        conn: &Connection,
        cluster_id: ClusterId,
        survivor: Option<Uuid>,
        actor: &Actor,
    ) -> CoreResult<MergeOutcome> {
        self.engine
            .capabilities()
            .authorize_cluster_decision(cluster_id, actor)?;
        let mut lock_ids = self.get(conn, cluster_id)?.members;
        lock_ids.push(cluster_id);
        let _guard = self.engine.locks().acquire(&lock_ids)?;

        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let clusters = SqliteClusterRepository::new(&tx);
        let references = SqliteReferenceRepository::new(&tx);
        let mut cluster = clusters.get(cluster_id)?.ok_or(CoreError::NotFound {
            kind: "cluster",
            id: cluster_id,
        })?;

        match cluster.status {
            ClusterStatus::Merged => {
                let recorded = stored_outcome(&tx, cluster_id)?;
                if survivor.is_some_and(|requested| requested != recorded.survivor) {
                    return Err(decided(&cluster, format!(
                        "already merged into {}",
                        recorded.survivor
                    )));
                }
                info!(
                    "event=cluster_merge module=dedup status=replayed cluster_id={}",
                    cluster_id
                );
                return Ok(MergeOutcome {
                    replayed: true,
                    ..recorded
                });
            }
            ClusterStatus::RejectedAsDistinct => {
                return Err(decided(&cluster, "cluster was rejected as distinct".to_string()));
            }
            ClusterStatus::Absorbed => return Err(absorbed(&cluster)),
            ClusterStatus::Unresolved => {}
        }

        let conflicting: Vec<Uuid> = clusters
            .unresolved_containing(&cluster.members)?
            .into_iter()
            .map(|other| other.id)
            .filter(|id| *id != cluster_id)
            .collect();
        if !conflicting.is_empty() {
            warn!(
                "event=cluster_merge module=dedup status=ambiguous cluster_id={} conflicting={}",
                cluster_id,
                conflicting.len()
            );
            return Err(CoreError::AmbiguousCluster {
                cluster_id,
                conflicting,
            });
        }

        let mut members: Vec<_> = references
            .list_by_ids(&cluster.members)?
            .into_iter()
            .filter(|reference| reference.merged_into.is_none())
            .collect();
        let survivor_id = match survivor {
            Some(requested) => {
                if !members.iter().any(|reference| reference.id == requested) {
                    return Err(CoreError::InvalidRequest(format!(
                        "{requested} is not a canonical member of cluster {cluster_id}"
                    )));
                }
                requested
            }
            None => {
                let candidates: Vec<DedupRecord> =
                    members.iter().map(DedupRecord::from_reference).collect();
                choose_survivor(&candidates)
                    .map(|record| record.id)
                    .ok_or_else(|| {
                        CoreError::InvalidRequest(format!(
                            "cluster {cluster_id} has no canonical members"
                        ))
                    })?
            }
        };
        members.sort_by_key(|reference| (reference.id != survivor_id, reference.id));

        let ledger = Ledger::new(&tx);
        let mut revisions: Vec<Revision> = Vec::with_capacity(members.len());
        let mut merged = Vec::new();
        for reference in &mut members {
            let from = reference.workflow_state();
            reference.cluster_id = Some(cluster_id);
            if reference.id != survivor_id {
                reference.merged_into = Some(survivor_id);
                merged.push(reference.id);
            }
            revisions.push(record_change(
                &ledger,
                &references,
                reference,
                &actor.id,
                changes::MERGE,
                Some(from),
            )?);
        }
        merged.sort();

        let summaries = SqliteSummaryRepository::new(&tx);
        let mut repointed_summaries = Vec::new();
        for merged_id in &merged {
            for mut summary in summaries.list_for_reference(*merged_id)? {
                let from = summary.workflow_state();
                summary.reference_id = survivor_id;
                revisions.push(record_change(
                    &ledger,
                    &summaries,
                    &mut summary,
                    &actor.id,
                    changes::MERGE,
                    Some(from),
                )?);
                repointed_summaries.push(summary.id);
            }
        }
        repointed_summaries.sort();

        cluster.status = ClusterStatus::Merged;
        cluster.survivor = Some(survivor_id);
        cluster.decided_by = Some(actor.id.clone());
        cluster.decided_at = Some(now_epoch_ms());
        clusters.record_decision(&cluster)?;

        let outcome = MergeOutcome {
            cluster_id,
            survivor: survivor_id,
            merged,
            repointed_summaries,
            revision_ids: revisions.iter().map(|revision| revision.id).collect(),
            replayed: false,
        };
        store_outcome(&tx, &outcome)?;
        tx.commit()?;

        info!(
            "event=cluster_merge module=dedup status=ok cluster_id={} survivor_id={} merged={} repointed_summaries={}",
            cluster_id,
            survivor_id,
            outcome.merged.len(),
            outcome.repointed_summaries.len()
        );
        for revision in &revisions {
            self.engine.publish(revision);
        }
        Ok(outcome)
    }

    /// Marks a cluster as describing distinct references.
    pub fn reject(
        &self,
        conn: &Connection,
        cluster_id: ClusterId,
        actor: &Actor,
    ) -> CoreResult<DuplicateCluster> {
        self.engine
            .capabilities()
            .authorize_cluster_decision(cluster_id, actor)?;
        let _guard = self.engine.locks().acquire(&[cluster_id])?;
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let clusters = SqliteClusterRepository::new(&tx);
        let mut cluster = clusters.get(cluster_id)?.ok_or(CoreError::NotFound {
            kind: "cluster",
            id: cluster_id,
        })?;

        match cluster.status {
            ClusterStatus::RejectedAsDistinct => return Ok(cluster),
            ClusterStatus::Merged => {
                return Err(decided(&cluster, "cluster was already merged".to_string()));
            }
            ClusterStatus::Absorbed => return Err(absorbed(&cluster)),
            ClusterStatus::Unresolved => {}
        }

        cluster.status = ClusterStatus::RejectedAsDistinct;
        cluster.decided_by = Some(actor.id.clone());
        cluster.decided_at = Some(now_epoch_ms());
        clusters.record_decision(&cluster)?;
        tx.commit()?;

        info!(
            "event=cluster_reject module=dedup status=ok cluster_id={} members={}",
            cluster_id,
            cluster.members.len()
        );
        Ok(cluster)
    }
}

fn decided(cluster: &DuplicateCluster, reason: String) -> CoreError {
    CoreError::IllegalTransition {
        kind: EntityKind::Reference,
        entity_id: cluster.id,
        state: cluster.status.as_str().to_string(),
        transition: MERGE_DECISION.to_string(),
        reason,
    }
}

fn absorbed(cluster: &DuplicateCluster) -> CoreError {
    let reason = match cluster.absorbed_into {
        Some(into) => format!("cluster was folded into {into}"),
        None => "cluster was folded into another cluster".to_string(),
    };
    decided(cluster, reason)
}

fn decision_token(cluster_id: ClusterId) -> String {
    format!("cluster-merge:{cluster_id}")
}

fn store_outcome(conn: &Connection, outcome: &MergeOutcome) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO idempotency_keys (token, entity_uuid, transition, outcome_json)
         VALUES (?1, ?2, ?3, ?4);",
        params![
            decision_token(outcome.cluster_id),
            outcome.cluster_id.to_string(),
            MERGE_DECISION,
            to_json(outcome)?,
        ],
    )?;
    Ok(())
}

fn stored_outcome(conn: &Connection, cluster_id: ClusterId) -> CoreResult<MergeOutcome> {
    let outcome_json: Option<String> = conn
        .query_row(
            "SELECT outcome_json FROM idempotency_keys WHERE token = ?1;",
            [decision_token(cluster_id)],
            |row| row.get(0),
        )
        .optional()?;
    let outcome_json = outcome_json.ok_or_else(|| {
        CoreError::InvalidData(format!("merged cluster {cluster_id} has no recorded outcome"))
    })?;
    from_json("outcome_json", &outcome_json)
}
