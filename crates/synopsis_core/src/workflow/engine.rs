//! Transition, creation and rollback entry points.
//!
//! # Responsibility
//! - Apply role-gated transitions to references, summaries, protocols and
//!   synopses, one ledger revision per accepted request.
//! - Create documents with their first revision.
//! - Restore authored content from a prior revision snapshot.
//!
//! # Invariants
//! - Order of acquisition: entity lock, then IMMEDIATE storage transaction.
//! - Row update, revision append and idempotency record commit together.
//! - Events are published after commit; replays publish nothing.
//! - `compile` is only reachable through the assembly service.

use crate::config::{CoreConfig, SummaryConfig};
use crate::error::{CoreError, CoreResult};
use crate::ledger::{snapshot_of, Ledger};
use crate::model::protocol::{Protocol, ProtocolContent};
use crate::model::reference::Reference;
use crate::model::revision::{changes, NewRevision, Revision, RevisionId};
use crate::model::summary::{validate_summary_content, ContentValidationError, Summary, SummaryContent};
use crate::model::synopsis::{ActionGrouping, Constituent, Synopsis};
use crate::model::workflow::{
    Actor, EntityKind, EntityRef, ReferenceState, SynopsisState, Transition, WorkflowState,
};
use crate::repo::protocol_repo::{ProtocolRepository, SqliteProtocolRepository};
use crate::repo::reference_repo::{ReferenceRepository, SqliteReferenceRepository};
use crate::repo::summary_repo::{SqliteSummaryRepository, SummaryRepository};
use crate::repo::synopsis_repo::{SqliteSynopsisRepository, SynopsisRepository};
use crate::repo::{from_json, to_json, EntityStore};
use crate::workflow::capability::CapabilityTable;
use crate::workflow::events::{EventPublisher, NoopPublisher, TransitionEvent};
use crate::workflow::lock::EntityLocks;
use crate::workflow::{machine, ManagedEntity};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Replacement content carried by `edit` and `resubmit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentUpdate {
    Summary(SummaryContent),
    Protocol(ProtocolContent),
}

impl ContentUpdate {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Summary(_) => EntityKind::Summary,
            Self::Protocol(_) => EntityKind::Protocol,
        }
    }
}

/// One actor request against one entity.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub entity: EntityRef,
    pub transition: Transition,
    pub actor: Actor,
    pub content: Option<ContentUpdate>,
    /// Replaying an applied token returns the stored outcome.
    pub idempotency_token: Option<String>,
}

impl TransitionRequest {
    pub fn new(entity: EntityRef, transition: Transition, actor: Actor) -> Self {
        Self {
            entity,
            transition,
            actor,
            content: None,
            idempotency_token: None,
        }
    }

    pub fn with_content(mut self, content: ContentUpdate) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.idempotency_token = Some(token.into());
        self
    }
}

/// Result of an accepted (or replayed) transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub entity: EntityRef,
    pub from_state: String,
    pub to_state: String,
    pub transition: Transition,
    pub revision_id: RevisionId,
    pub seq: u32,
    #[serde(default)]
    pub replayed: bool,
}

/// Computes synopsis constituents inside the compile transaction.
pub(crate) type CompileHook<'a> =
    &'a mut dyn FnMut(&Connection, &Synopsis) -> CoreResult<Vec<Constituent>>;

struct StepResult {
    from: WorkflowState,
    to: WorkflowState,
    revision: Revision,
}

/// Workflow engine shared by request workers.
pub struct WorkflowEngine {
    capabilities: CapabilityTable,
    summary_rules: SummaryConfig,
    locks: Arc<EntityLocks>,
    publisher: Arc<dyn EventPublisher>,
}

impl WorkflowEngine {
    pub fn new(
        config: &CoreConfig,
        locks: Arc<EntityLocks>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            capabilities: CapabilityTable::from_config(&config.workflow),
            summary_rules: config.summary.clone(),
            locks,
            publisher,
        }
    }

    /// Engine with its own lock table and no event delivery.
    pub fn with_defaults(config: &CoreConfig) -> Self {
        Self::new(
            config,
            Arc::new(EntityLocks::new(config.workflow.lock_timeout())),
            Arc::new(NoopPublisher),
        )
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    pub fn locks(&self) -> &EntityLocks {
        &self.locks
    }

    pub fn summary_rules(&self) -> &SummaryConfig {
        &self.summary_rules
    }

    /// Applies one transition atomically with its revision.
    pub fn apply(
        &self,
        conn: &Connection,
        request: TransitionRequest,
    ) -> CoreResult<TransitionOutcome> {
        if request.transition == Transition::Compile {
            return Err(CoreError::InvalidRequest(
                "`compile` runs through the assembly service".to_string(),
            ));
        }
        self.execute(conn, request, None)
    }

    /// Transitions the actor could take on the entity right now.
    pub fn available_transitions(
        &self,
        conn: &Connection,
        entity: EntityRef,
        actor: &Actor,
    ) -> CoreResult<Vec<Transition>> {
        let (state, merged_into) = match entity.kind {
            EntityKind::Reference => state_of::<Reference, _>(&SqliteReferenceRepository::new(conn), entity.id)?,
            EntityKind::Summary => state_of::<Summary, _>(&SqliteSummaryRepository::new(conn), entity.id)?,
            EntityKind::Protocol => state_of::<Protocol, _>(&SqliteProtocolRepository::new(conn), entity.id)?,
            EntityKind::Synopsis => state_of::<Synopsis, _>(&SqliteSynopsisRepository::new(conn), entity.id)?,
        };
        if merged_into.is_some() {
            return Ok(Vec::new());
        }
        Ok(machine::available_transitions(entity.kind, state)
            .into_iter()
            .filter(|transition| {
                actor.has_any_role(
                    &self
                        .capabilities
                        .required_roles(entity.kind, state, *transition),
                )
            })
            .collect())
    }

    pub(crate) fn execute(
        &self,
        conn: &Connection,
        request: TransitionRequest,
        compile: Option<CompileHook<'_>>,
    ) -> CoreResult<TransitionOutcome> {
        check_content_shape(&request)?;
        let _guard = self.locks.acquire(&[request.entity.id])?;
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

        if let Some(token) = request.idempotency_token.as_deref() {
            if let Some(outcome) = replay(&tx, token, &request)? {
                info!(
                    "event=workflow_transition module=workflow status=replayed kind={} entity_id={} transition={} seq={}",
                    request.entity.kind, request.entity.id, request.transition, outcome.seq
                );
                return Ok(outcome);
            }
        }

        let step = self
            .transition_in(&tx, &request, compile)
            .map_err(|err| log_rejection(&request, err))?;
        let outcome = TransitionOutcome {
            entity: request.entity,
            from_state: step.from.as_str().to_string(),
            to_state: step.to.as_str().to_string(),
            transition: request.transition,
            revision_id: step.revision.id,
            seq: step.revision.seq,
            replayed: false,
        };
        if let Some(token) = request.idempotency_token.as_deref() {
            remember(&tx, token, &request, &outcome)?;
        }
        tx.commit()?;

        info!(
            "event=workflow_transition module=workflow status=ok kind={} entity_id={} transition={} from={} to={} seq={}",
            request.entity.kind,
            request.entity.id,
            request.transition,
            outcome.from_state,
            outcome.to_state,
            outcome.seq
        );
        self.publish(&step.revision);
        Ok(outcome)
    }

    fn transition_in(
        &self,
        tx: &Connection,
        request: &TransitionRequest,
        compile: Option<CompileHook<'_>>,
    ) -> CoreResult<StepResult> {
        let ledger = Ledger::new(tx);
        match request.entity.kind {
            EntityKind::Reference => self.step(
                &SqliteReferenceRepository::new(tx),
                &ledger,
                request,
                |_: &mut Reference| Ok(()),
            ),
            EntityKind::Summary => self.step(
                &SqliteSummaryRepository::new(tx),
                &ledger,
                request,
                |summary: &mut Summary| {
                    if let Some(ContentUpdate::Summary(content)) = &request.content {
                        validate_summary_content(content, &self.summary_rules)?;
                        summary.apply_content(content.clone());
                    }
                    Ok(())
                },
            ),
            EntityKind::Protocol => self.step(
                &SqliteProtocolRepository::new(tx),
                &ledger,
                request,
                |protocol: &mut Protocol| {
                    if let Some(ContentUpdate::Protocol(content)) = &request.content {
                        validate_protocol_content(content)?;
                        protocol.apply_content(content.clone());
                    }
                    Ok(())
                },
            ),
            EntityKind::Synopsis => self.step(
                &SqliteSynopsisRepository::new(tx),
                &ledger,
                request,
                move |synopsis: &mut Synopsis| {
                    match request.transition {
                        Transition::Compile => {
                            let hook = compile.ok_or_else(|| {
                                CoreError::InvalidRequest(
                                    "`compile` requires an assembly pass".to_string(),
                                )
                            })?;
                            let constituents = hook(tx, &*synopsis)?;
                            synopsis.constituents = constituents;
                        }
                        Transition::Reassemble => synopsis.constituents.clear(),
                        _ => {}
                    }
                    Ok(())
                },
            ),
        }
    }

    fn step<E, S>(
        &self,
        store: &S,
        ledger: &Ledger<'_>,
        request: &TransitionRequest,
        payload: impl FnOnce(&mut E) -> CoreResult<()>,
    ) -> CoreResult<StepResult>
    where
        E: ManagedEntity,
        S: EntityStore<E>,
    {
        let id = request.entity.id;
        let mut entity: E = load_existing(store, id)?;
        let from = entity.workflow_state();
        let to = machine::resolve(E::KIND, id, from, request.transition, entity.merged_into())?;
        self.capabilities
            .authorize_transition(E::KIND, id, from, request.transition, &request.actor)?;

        payload(&mut entity)?;
        entity.set_workflow_state(to)?;
        let revision = ledger.append(NewRevision {
            entity: EntityRef::new(E::KIND, id),
            actor_id: request.actor.id.clone(),
            transition: request.transition.as_str().to_string(),
            from_state: Some(from.as_str().to_string()),
            to_state: to.as_str().to_string(),
            content: serde_json::to_value(&entity)?,
        })?;
        entity.set_version(revision.seq);
        store.save(&entity)?;
        Ok(StepResult { from, to, revision })
    }

    /// Restores the authored content of `target` and appends a `rollback`
    /// revision. The workflow state and lifecycle links stay as they are,
    /// so rollback never moves an entity along an edge. History is never
    /// truncated.
    pub fn rollback(
        &self,
        conn: &Connection,
        entity: EntityRef,
        target: RevisionId,
        actor: &Actor,
    ) -> CoreResult<Revision> {
        self.capabilities
            .authorize_rollback(entity.kind, entity.id, actor)?;
        let _guard = self.locks.acquire(&[entity.id])?;
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let ledger = Ledger::new(&tx);

        let revision = match entity.kind {
            EntityKind::Reference => {
                restore::<Reference, _>(&SqliteReferenceRepository::new(&tx), &ledger, entity.id, target, actor)
            }
            EntityKind::Summary => {
                restore::<Summary, _>(&SqliteSummaryRepository::new(&tx), &ledger, entity.id, target, actor)
            }
            EntityKind::Protocol => {
                restore::<Protocol, _>(&SqliteProtocolRepository::new(&tx), &ledger, entity.id, target, actor)
            }
            EntityKind::Synopsis => {
                restore::<Synopsis, _>(&SqliteSynopsisRepository::new(&tx), &ledger, entity.id, target, actor)
            }
        }?;
        tx.commit()?;

        info!(
            "event=workflow_rollback module=workflow status=ok kind={} entity_id={} target={} seq={}",
            entity.kind, entity.id, target, revision.seq
        );
        self.publish(&revision);
        Ok(revision)
    }

    /// Creates a draft summary of a canonical reference.
    pub fn create_summary(
        &self,
        conn: &Connection,
        reference_id: Uuid,
        content: SummaryContent,
        actor: &Actor,
    ) -> CoreResult<Summary> {
        validate_summary_content(&content, &self.summary_rules)?;
        let _guard = self.locks.acquire(&[reference_id])?;
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

        let reference = SqliteReferenceRepository::new(&tx)
            .get(reference_id)?
            .ok_or(CoreError::NotFound {
                kind: "reference",
                id: reference_id,
            })?;
        if let Some(survivor) = reference.merged_into {
            return Err(CoreError::IllegalTransition {
                kind: EntityKind::Reference,
                entity_id: reference_id,
                state: reference.state.as_str().to_string(),
                transition: "create_summary".to_string(),
                reason: format!("merged into {survivor}"),
            });
        }

        let mut summary = Summary::new_draft(reference_id, content, &actor.id);
        self.authorize_creation(&summary, actor)?;
        let store = SqliteSummaryRepository::new(&tx);
        store.insert(&summary)?;
        let revision = record_change(
            &Ledger::new(&tx),
            &store,
            &mut summary,
            &actor.id,
            changes::CREATE,
            None,
        )?;
        tx.commit()?;

        info!(
            "event=summary_create module=workflow status=ok summary_id={} reference_id={}",
            summary.id, reference_id
        );
        self.publish(&revision);
        Ok(summary)
    }

    /// Creates an `assembling` synopsis.
    pub fn create_synopsis(
        &self,
        conn: &Connection,
        title: &str,
        outline: Vec<ActionGrouping>,
        actor: &Actor,
    ) -> CoreResult<Synopsis> {
        if title.trim().is_empty() {
            return Err(ContentValidationError::EmptyField { field: "title" }.into());
        }
        let mut synopsis = Synopsis::new(title, outline)?;
        self.authorize_creation(&synopsis, actor)?;

        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let store = SqliteSynopsisRepository::new(&tx);
        store.insert(&synopsis)?;
        let revision = record_change(
            &Ledger::new(&tx),
            &store,
            &mut synopsis,
            &actor.id,
            changes::CREATE,
            None,
        )?;
        tx.commit()?;

        info!(
            "event=synopsis_create module=workflow status=ok synopsis_id={} groupings={}",
            synopsis.id,
            synopsis.outline.len()
        );
        self.publish(&revision);
        Ok(synopsis)
    }

    /// Creates a draft protocol and attaches it to its synopsis.
    ///
    /// The synopsis must still be `assembling`.
    pub fn create_protocol(
        &self,
        conn: &Connection,
        synopsis_id: Uuid,
        content: ProtocolContent,
        actor: &Actor,
    ) -> CoreResult<Protocol> {
        validate_protocol_content(&content)?;
        let mut protocol = Protocol::new_draft(synopsis_id, content, &actor.id);
        self.authorize_creation(&protocol, actor)?;

        let _guard = self.locks.acquire(&[synopsis_id, protocol.id])?;
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let ledger = Ledger::new(&tx);
        let synopses = SqliteSynopsisRepository::new(&tx);
        let mut synopsis = synopses.get(synopsis_id)?.ok_or(CoreError::NotFound {
            kind: "synopsis",
            id: synopsis_id,
        })?;
        if synopsis.state != SynopsisState::Assembling {
            return Err(CoreError::IllegalTransition {
                kind: EntityKind::Synopsis,
                entity_id: synopsis_id,
                state: synopsis.state.as_str().to_string(),
                transition: changes::ATTACH_PROTOCOL.to_string(),
                reason: "protocols attach while assembling".to_string(),
            });
        }

        let protocols = SqliteProtocolRepository::new(&tx);
        protocols.insert(&protocol)?;
        let created = record_change(
            &ledger,
            &protocols,
            &mut protocol,
            &actor.id,
            changes::CREATE,
            None,
        )?;

        let state = synopsis.workflow_state();
        synopsis.protocol_id = Some(protocol.id);
        let attached = record_change(
            &ledger,
            &synopses,
            &mut synopsis,
            &actor.id,
            changes::ATTACH_PROTOCOL,
            Some(state),
        )?;
        tx.commit()?;

        info!(
            "event=protocol_create module=workflow status=ok protocol_id={} synopsis_id={}",
            protocol.id, synopsis_id
        );
        self.publish(&created);
        self.publish(&attached);
        Ok(protocol)
    }

    /// Raises or clears the screening help flag on a reference.
    ///
    /// Allowed to actors who may take screening decisions.
    pub fn flag_needs_help(
        &self,
        conn: &Connection,
        reference_id: Uuid,
        needs_help: bool,
        actor: &Actor,
    ) -> CoreResult<Revision> {
        let _guard = self.locks.acquire(&[reference_id])?;
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let store = SqliteReferenceRepository::new(&tx);
        let mut reference = store.get(reference_id)?.ok_or(CoreError::NotFound {
            kind: "reference",
            id: reference_id,
        })?;

        let state = reference.workflow_state();
        let illegal = |reason: String| CoreError::IllegalTransition {
            kind: EntityKind::Reference,
            entity_id: reference_id,
            state: state.as_str().to_string(),
            transition: changes::FLAG.to_string(),
            reason,
        };
        if let Some(survivor) = reference.merged_into {
            return Err(illegal(format!("merged into {survivor}")));
        }
        if reference.state != ReferenceState::Screening {
            return Err(illegal("flags are raised during screening".to_string()));
        }
        self.capabilities.authorize_transition(
            EntityKind::Reference,
            reference_id,
            state,
            Transition::Include,
            actor,
        )?;

        reference.needs_help = needs_help;
        let revision = record_change(
            &Ledger::new(&tx),
            &store,
            &mut reference,
            &actor.id,
            changes::FLAG,
            Some(state),
        )?;
        tx.commit()?;

        info!(
            "event=reference_flag module=workflow status=ok reference_id={} needs_help={}",
            reference_id, needs_help
        );
        self.publish(&revision);
        Ok(revision)
    }

    /// Creating a document requires a role allowed to take the first edge
    /// out of its initial state: `edit` for summary and protocol drafts,
    /// `compile` for synopses.
    fn authorize_creation<E: ManagedEntity>(&self, entity: &E, actor: &Actor) -> CoreResult<()> {
        let first_edge = match E::KIND {
            EntityKind::Synopsis => Transition::Compile,
            EntityKind::Reference => Transition::StartScreening,
            EntityKind::Summary | EntityKind::Protocol => Transition::Edit,
        };
        self.capabilities.authorize_transition(
            E::KIND,
            entity.id(),
            entity.workflow_state(),
            first_edge,
            actor,
        )
    }

    /// Delivers the event for a committed revision; failures are logged.
    pub(crate) fn publish(&self, revision: &Revision) {
        let event = TransitionEvent::from_revision(revision);
        if let Err(err) = self.publisher.publish(&event) {
            warn!(
                "event=transition_publish module=workflow status=error entity_id={} revision_id={} error={}",
                revision.entity.id, revision.id, err
            );
        }
    }
}

/// Appends a non-edge change (create, import, merge, flag) and stores the
/// entity with its new version.
pub(crate) fn record_change<E, S>(
    ledger: &Ledger<'_>,
    store: &S,
    entity: &mut E,
    actor_id: &str,
    change: &str,
    from: Option<WorkflowState>,
) -> CoreResult<Revision>
where
    E: ManagedEntity,
    S: EntityStore<E>,
{
    let revision = ledger.append(NewRevision {
        entity: EntityRef::new(E::KIND, entity.id()),
        actor_id: actor_id.to_string(),
        transition: change.to_string(),
        from_state: from.map(|state| state.as_str().to_string()),
        to_state: entity.workflow_state().as_str().to_string(),
        content: serde_json::to_value(&*entity)?,
    })?;
    entity.set_version(revision.seq);
    store.save(entity)?;
    Ok(revision)
}

fn load_existing<E, S>(store: &S, id: Uuid) -> CoreResult<E>
where
    E: ManagedEntity,
    S: EntityStore<E>,
{
    store.load(id)?.ok_or(CoreError::NotFound {
        kind: E::KIND.as_str(),
        id,
    })
}

fn state_of<E, S>(store: &S, id: Uuid) -> CoreResult<(WorkflowState, Option<Uuid>)>
where
    E: ManagedEntity,
    S: EntityStore<E>,
{
    let entity: E = load_existing(store, id)?;
    Ok((entity.workflow_state(), entity.merged_into()))
}

fn restore<E, S>(
    store: &S,
    ledger: &Ledger<'_>,
    id: Uuid,
    target: RevisionId,
    actor: &Actor,
) -> CoreResult<Revision>
where
    E: ManagedEntity,
    S: EntityStore<E>,
{
    let current: E = load_existing(store, id)?;
    if let Some(survivor) = current.merged_into() {
        return Err(CoreError::IllegalTransition {
            kind: E::KIND,
            entity_id: id,
            state: current.workflow_state().as_str().to_string(),
            transition: changes::ROLLBACK.to_string(),
            reason: format!("merged into {survivor}"),
        });
    }

    let revision = ledger.rollback(EntityRef::new(E::KIND, id), target, actor, |target| {
        let mut restored: E = snapshot_of(target)?;
        restored.keep_lifecycle(&current);
        Ok(serde_json::to_value(&restored)?)
    })?;
    let mut restored: E = snapshot_of(&revision)?;
    restored.set_version(revision.seq);
    store.save(&restored)?;
    Ok(revision)
}

fn validate_protocol_content(content: &ProtocolContent) -> Result<(), ContentValidationError> {
    if content.title.trim().is_empty() {
        return Err(ContentValidationError::EmptyField { field: "title" });
    }
    Ok(())
}

fn check_content_shape(request: &TransitionRequest) -> CoreResult<()> {
    let transition = request.transition;
    match (&request.content, transition.carries_content()) {
        (None, true) => Err(CoreError::InvalidRequest(format!(
            "`{transition}` requires replacement content"
        ))),
        (Some(_), false) => Err(CoreError::InvalidRequest(format!(
            "`{transition}` does not accept content"
        ))),
        (Some(content), true) if content.kind() != request.entity.kind => {
            Err(CoreError::InvalidRequest(format!(
                "{} content cannot be applied to a {}",
                content.kind(),
                request.entity.kind
            )))
        }
        _ => Ok(()),
    }
}

fn replay(
    conn: &Connection,
    token: &str,
    request: &TransitionRequest,
) -> CoreResult<Option<TransitionOutcome>> {
    let stored = conn
        .query_row(
            "SELECT entity_uuid, transition, outcome_json FROM idempotency_keys WHERE token = ?1;",
            [token],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((entity_uuid, transition, outcome_json)) = stored else {
        return Ok(None);
    };

    if entity_uuid != request.entity.id.to_string() || transition != request.transition.as_str() {
        return Err(CoreError::IdempotencyConflict {
            token: token.to_string(),
            entity_id: request.entity.id,
        });
    }
    let mut outcome: TransitionOutcome = from_json("outcome_json", &outcome_json)?;
    outcome.replayed = true;
    Ok(Some(outcome))
}

fn remember(
    conn: &Connection,
    token: &str,
    request: &TransitionRequest,
    outcome: &TransitionOutcome,
) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO idempotency_keys (token, entity_uuid, transition, outcome_json)
         VALUES (?1, ?2, ?3, ?4);",
        params![
            token,
            request.entity.id.to_string(),
            request.transition.as_str(),
            to_json(outcome)?,
        ],
    )?;
    Ok(())
}

fn log_rejection(request: &TransitionRequest, err: CoreError) -> CoreError {
    warn!(
        "event=workflow_transition module=workflow status=rejected kind={} entity_id={} transition={} actor_id={} reason={}",
        request.entity.kind,
        request.entity.id,
        request.transition,
        request.actor.id,
        err.reason_code()
    );
    err
}
