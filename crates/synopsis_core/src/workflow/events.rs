//! Transition events and the notification seam.
//!
//! Events are published after the owning transaction commits. Publishing is
//! best effort: a failing publisher never rolls back a committed transition.

use crate::model::revision::Revision;
use crate::model::workflow::EntityRef;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Committed state change of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub entity: EntityRef,
    pub from_state: Option<String>,
    pub to_state: String,
    pub transition: String,
    pub actor_id: String,
    pub revision_id: Uuid,
    /// Epoch milliseconds.
    pub occurred_at: i64,
}

impl TransitionEvent {
    pub fn from_revision(revision: &Revision) -> Self {
        Self {
            entity: revision.entity,
            from_state: revision.from_state.clone(),
            to_state: revision.to_state.clone(),
            transition: revision.transition.clone(),
            actor_id: revision.actor_id.clone(),
            revision_id: revision.id,
            occurred_at: revision.created_at,
        }
    }
}

#[derive(Debug, Error)]
#[error("event delivery failed: {0}")]
pub struct PublishError(pub String);

/// Notification collaborator.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &TransitionEvent) -> Result<(), PublishError>;
}

/// Publisher that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: &TransitionEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Publisher that keeps events in memory, in publish order.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<TransitionEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<TransitionEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: &TransitionEvent) -> Result<(), PublishError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
