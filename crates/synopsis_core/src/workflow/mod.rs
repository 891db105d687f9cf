//! Role-gated lifecycle engine.
//!
//! # Responsibility
//! - Own the edge table, the capability table, per-entity locks and the
//!   notification seam.
//! - Drive every managed entity through one generic load/resolve/authorize/
//!   append/save step.
//!
//! # Invariants
//! - Each accepted transition appends exactly one ledger revision in the same
//!   storage transaction as the row update.
//! - Snapshots exclude `version`; the engine sets it to the appended `seq`.

pub mod capability;
pub mod engine;
pub mod events;
pub mod lock;
pub mod machine;

use crate::error::{CoreError, CoreResult};
use crate::model::protocol::Protocol;
use crate::model::reference::Reference;
use crate::model::summary::Summary;
use crate::model::synopsis::Synopsis;
use crate::model::workflow::{EntityKind, WorkflowState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

pub use capability::CapabilityTable;
pub use engine::{ContentUpdate, TransitionOutcome, TransitionRequest, WorkflowEngine};
pub use events::{EventPublisher, NoopPublisher, PublishError, RecordingPublisher, TransitionEvent};
pub use lock::{EntityGuard, EntityLocks};

/// Entity whose state is governed by the engine and recorded in the ledger.
pub trait ManagedEntity: Serialize + DeserializeOwned {
    const KIND: EntityKind;

    fn id(&self) -> Uuid;
    fn workflow_state(&self) -> WorkflowState;
    fn set_workflow_state(&mut self, state: WorkflowState) -> CoreResult<()>;
    fn version(&self) -> u32;
    fn set_version(&mut self, version: u32);

    /// Copies the fields owned by the workflow (state and lifecycle links)
    /// from `current`, so a restored snapshot only changes authored content.
    fn keep_lifecycle(&mut self, current: &Self);

    /// Survivor id for references merged away; such entities accept no edge.
    fn merged_into(&self) -> Option<Uuid> {
        None
    }
}

fn foreign_state(kind: EntityKind, state: WorkflowState) -> CoreError {
    CoreError::InvalidData(format!("state `{state}` does not belong to {kind}"))
}

impl ManagedEntity for Reference {
    const KIND: EntityKind = EntityKind::Reference;

    fn id(&self) -> Uuid {
        self.id
    }

    fn workflow_state(&self) -> WorkflowState {
        WorkflowState::Reference(self.state)
    }

    fn set_workflow_state(&mut self, state: WorkflowState) -> CoreResult<()> {
        match state {
            WorkflowState::Reference(state) => {
                self.state = state;
                Ok(())
            }
            other => Err(foreign_state(Self::KIND, other)),
        }
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    fn keep_lifecycle(&mut self, current: &Self) {
        self.state = current.state;
        self.cluster_id = current.cluster_id;
        self.merged_into = current.merged_into;
        self.needs_help = current.needs_help;
    }

    fn merged_into(&self) -> Option<Uuid> {
        self.merged_into
    }
}

impl ManagedEntity for Summary {
    const KIND: EntityKind = EntityKind::Summary;

    fn id(&self) -> Uuid {
        self.id
    }

    fn workflow_state(&self) -> WorkflowState {
        WorkflowState::Document(self.state)
    }

    fn set_workflow_state(&mut self, state: WorkflowState) -> CoreResult<()> {
        match state {
            WorkflowState::Document(state) => {
                self.state = state;
                Ok(())
            }
            other => Err(foreign_state(Self::KIND, other)),
        }
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    fn keep_lifecycle(&mut self, current: &Self) {
        self.state = current.state;
        self.reference_id = current.reference_id;
    }
}

impl ManagedEntity for Protocol {
    const KIND: EntityKind = EntityKind::Protocol;

    fn id(&self) -> Uuid {
        self.id
    }

    fn workflow_state(&self) -> WorkflowState {
        WorkflowState::Document(self.state)
    }

    fn set_workflow_state(&mut self, state: WorkflowState) -> CoreResult<()> {
        match state {
            WorkflowState::Document(state) => {
                self.state = state;
                Ok(())
            }
            other => Err(foreign_state(Self::KIND, other)),
        }
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    fn keep_lifecycle(&mut self, current: &Self) {
        self.state = current.state;
        self.synopsis_id = current.synopsis_id;
    }
}

impl ManagedEntity for Synopsis {
    const KIND: EntityKind = EntityKind::Synopsis;

    fn id(&self) -> Uuid {
        self.id
    }

    fn workflow_state(&self) -> WorkflowState {
        WorkflowState::Synopsis(self.state)
    }

    fn set_workflow_state(&mut self, state: WorkflowState) -> CoreResult<()> {
        match state {
            WorkflowState::Synopsis(state) => {
                self.state = state;
                Ok(())
            }
            other => Err(foreign_state(Self::KIND, other)),
        }
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    fn keep_lifecycle(&mut self, current: &Self) {
        self.state = current.state;
        self.protocol_id = current.protocol_id;
        self.constituents = current.constituents.clone();
    }
}
