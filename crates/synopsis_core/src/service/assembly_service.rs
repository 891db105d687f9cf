//! Synopsis assembly use-case.
//!
//! # Responsibility
//! - Gather approved content for a synopsis and build its content tree.
//! - Apply `compile` with the constituent list recorded in the revision.
//! - Report whether a compiled synopsis has drifted from current content.
//!
//! # Invariants
//! - `compile` gathers inside its own IMMEDIATE transaction, so the recorded
//!   constituents match the tree returned to the caller.
//! - Preview and render never write.

use crate::assembly::compiler::eligible_constituents;
use crate::assembly::{
    compile_tree, AssemblyInput, Candidate, ContentTree, ProtocolInput, Renderer,
};
use crate::config::{AssemblyConfig, CoreConfig};
use crate::control::OperationControl;
use crate::error::{CoreError, CoreResult};
use crate::ledger::Ledger;
use crate::model::revision::RevisionId;
use crate::model::synopsis::{Constituent, Synopsis, SynopsisId};
use crate::model::workflow::{Actor, EntityKind, EntityRef, SynopsisState, Transition};
use crate::repo::protocol_repo::{ProtocolRepository, SqliteProtocolRepository};
use crate::repo::reference_repo::{ReferenceRepository, SqliteReferenceRepository};
use crate::repo::summary_repo::{SqliteSummaryRepository, SummaryRepository};
use crate::repo::synopsis_repo::{SqliteSynopsisRepository, SynopsisRepository};
use crate::workflow::engine::CompileHook;
use crate::workflow::{TransitionOutcome, TransitionRequest, WorkflowEngine};
use log::info;
use rusqlite::Connection;
use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

/// Accepted `compile` plus the tree it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSynopsis {
    pub outcome: TransitionOutcome,
    pub tree: ContentTree,
}

/// Drift between recorded constituents and current approved content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Staleness {
    pub synopsis_id: SynopsisId,
    pub state: SynopsisState,
    /// Compiled or published and the constituents no longer match.
    pub stale: bool,
    /// Eligible now but not recorded.
    pub added: Vec<Constituent>,
    /// Recorded but no longer eligible, or superseded by a newer revision.
    pub dropped: Vec<Constituent>,
}

pub struct AssemblyService<'a> {
    engine: &'a WorkflowEngine,
    config: AssemblyConfig,
}

impl<'a> AssemblyService<'a> {
    pub fn new(config: &CoreConfig, engine: &'a WorkflowEngine) -> Self {
        Self {
            engine,
            config: config.assembly.clone(),
        }
    }

    /// Configured assembly budget; callers combine it with their own token.
    pub fn timeout_ms(&self) -> Option<u64> {
        self.config.timeout_ms
    }

    /// Builds the tree without changing any state.
    pub fn preview(
        &self,
        conn: &Connection,
        synopsis_id: SynopsisId,
        control: &OperationControl,
    ) -> CoreResult<ContentTree> {
        let synopsis = load_synopsis(conn, synopsis_id)?;
        let input = gather(conn, synopsis)?;
        compile_tree(&input, &self.config, control)
    }

    /// Applies `compile`: builds the tree, records its constituents and
    /// moves the synopsis to `compiled`.
    ///
    /// A replayed token returns the stored outcome with a freshly built
    /// tree.
    pub fn compile(
        &self,
        conn: &Connection,
        synopsis_id: SynopsisId,
        actor: &Actor,
        idempotency_token: Option<String>,
        control: &OperationControl,
    ) -> CoreResult<CompiledSynopsis> {
        let started = Instant::now();
        info!(
            "event=assembly_compile module=assembly status=start synopsis_id={}",
            synopsis_id
        );

        let mut request = TransitionRequest::new(
            EntityRef::new(EntityKind::Synopsis, synopsis_id),
            Transition::Compile,
            actor.clone(),
        );
        if let Some(token) = idempotency_token {
            request = request.with_token(token);
        }

        let mut built: Option<ContentTree> = None;
        let mut build = |tx: &Connection, synopsis: &Synopsis| -> CoreResult<Vec<Constituent>> {
            let input = gather(tx, synopsis.clone())?;
            let tree = compile_tree(&input, &self.config, control)?;
            let constituents = tree.constituents();
            built = Some(tree);
            Ok(constituents)
        };
        let outcome = self.engine
            .execute(conn, request, Some(&mut build as CompileHook<'_>))?;
        let tree = match built {
            Some(tree) => tree,
            None => self.preview(conn, synopsis_id, control)?,
        };

        info!(
            "event=assembly_compile module=assembly status=ok synopsis_id={} groups={} constituents={} warnings={} duration_ms={}",
            synopsis_id,
            tree.groups.len(),
            tree.constituents().len(),
            tree.warnings.len(),
            started.elapsed().as_millis()
        );
        Ok(CompiledSynopsis { outcome, tree })
    }

    /// Compares recorded constituents with what a compile would record now.
    pub fn staleness(&self, conn: &Connection, synopsis_id: SynopsisId) -> CoreResult<Staleness> {
        let synopsis = load_synopsis(conn, synopsis_id)?;
        let recorded = synopsis.constituents.clone();
        let state = synopsis.state;
        let current = eligible_constituents(&gather(conn, synopsis)?.candidates);

        let added: Vec<Constituent> = current
            .iter()
            .filter(|constituent| !recorded.contains(constituent))
            .cloned()
            .collect();
        let mut dropped: Vec<Constituent> = recorded
            .iter()
            .filter(|constituent| !current.contains(constituent))
            .cloned()
            .collect();
        dropped.sort();
        let stale = state != SynopsisState::Assembling && !(added.is_empty() && dropped.is_empty());

        info!(
            "event=assembly_staleness module=assembly status=ok synopsis_id={} stale={} added={} dropped={}",
            synopsis_id,
            stale,
            added.len(),
            dropped.len()
        );
        Ok(Staleness {
            synopsis_id,
            state,
            stale,
            added,
            dropped,
        })
    }

    pub fn render(&self, tree: &ContentTree, renderer: &dyn Renderer) -> CoreResult<Vec<u8>> {
        let bytes = renderer.render(tree)?;
        info!(
            "event=assembly_render module=assembly status=ok synopsis_id={} format={} bytes={}",
            tree.synopsis_id,
            renderer.format(),
            bytes.len()
        );
        Ok(bytes)
    }
}

fn load_synopsis(conn: &Connection, synopsis_id: SynopsisId) -> CoreResult<Synopsis> {
    SqliteSynopsisRepository::new(conn)
        .get(synopsis_id)?
        .ok_or(CoreError::NotFound {
            kind: "synopsis",
            id: synopsis_id,
        })
}

/// Reads summaries for every outline action, their references and current
/// revisions, and the attached protocol.
fn gather(conn: &Connection, synopsis: Synopsis) -> CoreResult<AssemblyInput> {
    let ledger = Ledger::new(conn);
    let references = SqliteReferenceRepository::new(conn);
    let actions: Vec<String> = synopsis
        .outline
        .iter()
        .flat_map(|grouping| grouping.actions.iter().cloned())
        .collect();

    let mut candidates = Vec::new();
    for summary in SqliteSummaryRepository::new(conn).list_by_actions(&actions)? {
        let reference = references
            .get(summary.reference_id)?
            .ok_or(CoreError::NotFound {
                kind: "reference",
                id: summary.reference_id,
            })?;
        let revision_id = current_revision(&ledger, summary.id)?;
        candidates.push(Candidate {
            summary,
            revision_id,
            reference,
        });
    }

    let protocol = match synopsis.protocol_id {
        Some(protocol_id) => {
            let protocol = SqliteProtocolRepository::new(conn)
                .get(protocol_id)?
                .ok_or(CoreError::NotFound {
                    kind: "protocol",
                    id: protocol_id,
                })?;
            let revision_id = current_revision(&ledger, protocol_id)?;
            Some(ProtocolInput {
                protocol,
                revision_id,
            })
        }
        None => None,
    };

    Ok(AssemblyInput {
        synopsis,
        protocol,
        candidates,
    })
}

fn current_revision(ledger: &Ledger<'_>, entity_id: Uuid) -> CoreResult<RevisionId> {
    ledger
        .latest(entity_id)?
        .map(|revision| revision.id)
        .ok_or_else(|| CoreError::InvalidData(format!("entity {entity_id} has no revisions")))
}
