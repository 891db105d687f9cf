//! Role-capability table for workflow edges and administrative actions.
//!
//! # Responsibility
//! - Map `(kind, from state, transition)` to the roles allowed to take it.
//! - Gate rollback and duplicate-cluster decisions by configured roles.
//!
//! # Invariants
//! - An edge without a configured rule is denied to every actor.
//! - An actor passes when it holds at least one required role.

use crate::config::{CapabilityRule, WorkflowConfig};
use crate::error::{CoreError, CoreResult};
use crate::model::workflow::{Actor, EntityKind, Transition, WorkflowState};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

type EdgeKey = (EntityKind, WorkflowState, Transition);

/// Compiled capability table.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    edges: HashMap<EdgeKey, BTreeSet<String>>,
    rollback_roles: BTreeSet<String>,
    cluster_decision_roles: BTreeSet<String>,
}

impl CapabilityTable {
    /// Builds the table from configuration. Rules naming unknown states are
    /// skipped; `CoreConfig::validate` reports them.
    pub fn from_config(config: &WorkflowConfig) -> Self {
        let mut edges: HashMap<EdgeKey, BTreeSet<String>> = HashMap::new();
        for CapabilityRule {
            kind,
            from,
            transition,
            roles,
        } in &config.capabilities
        {
            let Some(state) = WorkflowState::parse(*kind, from) else {
                continue;
            };
            edges
                .entry((*kind, state, *transition))
                .or_default()
                .extend(roles.iter().cloned());
        }

        Self {
            edges,
            rollback_roles: config.rollback_roles.iter().cloned().collect(),
            cluster_decision_roles: config.cluster_decision_roles.iter().cloned().collect(),
        }
    }

    /// Roles allowed to take an edge; empty when no rule exists.
    pub fn required_roles(
        &self,
        kind: EntityKind,
        from: WorkflowState,
        transition: Transition,
    ) -> Vec<String> {
        self.edges
            .get(&(kind, from, transition))
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn authorize_transition(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        from: WorkflowState,
        transition: Transition,
        actor: &Actor,
    ) -> CoreResult<()> {
        let allowed = self.edges.get(&(kind, from, transition));
        match allowed {
            Some(roles) if actor.has_any_role(roles) => Ok(()),
            _ => Err(CoreError::CapabilityDenied {
                kind,
                entity_id,
                transition: transition.as_str().to_string(),
                actor_id: actor.id.clone(),
                required: self.required_roles(kind, from, transition),
            }),
        }
    }

    pub fn authorize_rollback(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        actor: &Actor,
    ) -> CoreResult<()> {
        authorize_named(&self.rollback_roles, kind, entity_id, "rollback", actor)
    }

    pub fn authorize_cluster_decision(&self, cluster_id: Uuid, actor: &Actor) -> CoreResult<()> {
        authorize_named(
            &self.cluster_decision_roles,
            EntityKind::Reference,
            cluster_id,
            "cluster_decision",
            actor,
        )
    }
}

fn authorize_named(
    roles: &BTreeSet<String>,
    kind: EntityKind,
    entity_id: Uuid,
    action: &str,
    actor: &Actor,
) -> CoreResult<()> {
    if actor.has_any_role(roles) {
        return Ok(());
    }
    Err(CoreError::CapabilityDenied {
        kind,
        entity_id,
        transition: action.to_string(),
        actor_id: actor.id.clone(),
        required: roles.iter().cloned().collect(),
    })
}
