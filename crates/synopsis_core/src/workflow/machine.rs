//! Lifecycle edges for every entity kind.
//!
//! # Responsibility
//! - Own the single edge table consulted by the engine, the capability
//!   table defaults and configuration validation.
//!
//! # Invariants
//! - Every edge is keyed by `(kind, from, transition)`; at most one target.
//! - Summaries and protocols share one document lifecycle.

use crate::error::{CoreError, CoreResult};
use crate::model::workflow::{
    DocumentState, EntityKind, ReferenceState, SynopsisState, Transition, WorkflowState,
};
use once_cell::sync::Lazy;
use uuid::Uuid;

/// One accepted edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub kind: EntityKind,
    pub from: WorkflowState,
    pub transition: Transition,
    pub to: WorkflowState,
}

const REFERENCE_EDGES: [(ReferenceState, Transition, ReferenceState); 4] = [
    (
        ReferenceState::Imported,
        Transition::StartScreening,
        ReferenceState::Screening,
    ),
    (
        ReferenceState::Screening,
        Transition::Include,
        ReferenceState::Included,
    ),
    (
        ReferenceState::Screening,
        Transition::Exclude,
        ReferenceState::Excluded,
    ),
    (
        ReferenceState::Excluded,
        Transition::Reopen,
        ReferenceState::Screening,
    ),
];

const DOCUMENT_EDGES: [(DocumentState, Transition, DocumentState); 8] = [
    (DocumentState::Draft, Transition::Edit, DocumentState::Draft),
    (
        DocumentState::Draft,
        Transition::Submit,
        DocumentState::Submitted,
    ),
    (
        DocumentState::Submitted,
        Transition::StartReview,
        DocumentState::UnderReview,
    ),
    (
        DocumentState::UnderReview,
        Transition::RequestChanges,
        DocumentState::ChangesRequested,
    ),
    (
        DocumentState::UnderReview,
        Transition::Approve,
        DocumentState::Approved,
    ),
    (
        DocumentState::ChangesRequested,
        Transition::Revise,
        DocumentState::Draft,
    ),
    (
        DocumentState::ChangesRequested,
        Transition::Resubmit,
        DocumentState::UnderReview,
    ),
    (
        DocumentState::Approved,
        Transition::Revise,
        DocumentState::Draft,
    ),
];

const SYNOPSIS_EDGES: [(SynopsisState, Transition, SynopsisState); 3] = [
    (
        SynopsisState::Assembling,
        Transition::Compile,
        SynopsisState::Compiled,
    ),
    (
        SynopsisState::Compiled,
        Transition::Publish,
        SynopsisState::Published,
    ),
    (
        SynopsisState::Compiled,
        Transition::Reassemble,
        SynopsisState::Assembling,
    ),
];

/// Full edge table.
pub static EDGES: Lazy<Vec<Edge>> = Lazy::new(|| {
    let mut edges = Vec::new();
    for (from, transition, to) in REFERENCE_EDGES {
        edges.push(Edge {
            kind: EntityKind::Reference,
            from: WorkflowState::Reference(from),
            transition,
            to: WorkflowState::Reference(to),
        });
    }
    for kind in [EntityKind::Summary, EntityKind::Protocol] {
        for (from, transition, to) in DOCUMENT_EDGES {
            edges.push(Edge {
                kind,
                from: WorkflowState::Document(from),
                transition,
                to: WorkflowState::Document(to),
            });
        }
    }
    for (from, transition, to) in SYNOPSIS_EDGES {
        edges.push(Edge {
            kind: EntityKind::Synopsis,
            from: WorkflowState::Synopsis(from),
            transition,
            to: WorkflowState::Synopsis(to),
        });
    }
    edges
});

/// Target state for an edge, if the edge exists.
pub fn next_state(
    kind: EntityKind,
    from: WorkflowState,
    transition: Transition,
) -> Option<WorkflowState> {
    EDGES
        .iter()
        .find(|edge| edge.kind == kind && edge.from == from && edge.transition == transition)
        .map(|edge| edge.to)
}

/// Transitions available from `from`, in table order.
pub fn available_transitions(kind: EntityKind, from: WorkflowState) -> Vec<Transition> {
    EDGES
        .iter()
        .filter(|edge| edge.kind == kind && edge.from == from)
        .map(|edge| edge.transition)
        .collect()
}

/// Resolves the target state or fails with `IllegalTransition`.
///
/// `merged_into` is set for references merged away; they accept no edge.
pub fn resolve(
    kind: EntityKind,
    entity_id: Uuid,
    from: WorkflowState,
    transition: Transition,
    merged_into: Option<Uuid>,
) -> CoreResult<WorkflowState> {
    if let Some(survivor) = merged_into {
        return Err(CoreError::IllegalTransition {
            kind,
            entity_id,
            state: from.as_str().to_string(),
            transition: transition.as_str().to_string(),
            reason: format!("merged into {survivor}"),
        });
    }

    next_state(kind, from, transition).ok_or_else(|| {
        let allowed = available_transitions(kind, from)
            .into_iter()
            .map(Transition::as_str)
            .collect::<Vec<_>>();
        CoreError::IllegalTransition {
            kind,
            entity_id,
            state: from.as_str().to_string(),
            transition: transition.as_str().to_string(),
            reason: if allowed.is_empty() {
                "no transitions leave this state".to_string()
            } else {
                format!("allowed: {}", allowed.join(", "))
            },
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{available_transitions, next_state, resolve, EDGES};
    use crate::error::CoreError;
    use crate::model::workflow::{
        DocumentState, EntityKind, ReferenceState, SynopsisState, Transition, WorkflowState,
    };
    use uuid::Uuid;

    #[test]
    fn draft_cannot_be_approved_directly() {
        let err = resolve(
            EntityKind::Summary,
            Uuid::new_v4(),
            WorkflowState::Document(DocumentState::Draft),
            Transition::Approve,
            None,
        )
        .unwrap_err();
        assert_eq!(err.reason_code(), "illegal_transition");
        assert!(err.to_string().contains("allowed: edit, submit"));
    }

    #[test]
    fn changes_requested_resubmits_to_under_review() {
        assert_eq!(
            next_state(
                EntityKind::Protocol,
                WorkflowState::Document(DocumentState::ChangesRequested),
                Transition::Resubmit,
            ),
            Some(WorkflowState::Document(DocumentState::UnderReview))
        );
    }

    #[test]
    fn merged_reference_rejects_every_edge() {
        let err = resolve(
            EntityKind::Reference,
            Uuid::new_v4(),
            WorkflowState::Reference(ReferenceState::Imported),
            Transition::StartScreening,
            Some(Uuid::new_v4()),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::IllegalTransition { .. }));
    }

    #[test]
    fn published_synopsis_is_terminal() {
        assert!(available_transitions(
            EntityKind::Synopsis,
            WorkflowState::Synopsis(SynopsisState::Published)
        )
        .is_empty());
    }

    #[test]
    fn edge_keys_are_unique() {
        for (index, edge) in EDGES.iter().enumerate() {
            let duplicates = EDGES[index + 1..].iter().any(|other| {
                other.kind == edge.kind
                    && other.from == edge.from
                    && other.transition == edge.transition
            });
            assert!(!duplicates, "duplicate edge {edge:?}");
        }
    }
}
