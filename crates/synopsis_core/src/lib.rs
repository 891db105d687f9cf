//! Core of the evidence-synopsis pipeline.
//!
//! Bibliographic import and normalization, duplicate clustering, role-gated
//! editorial workflow with an append-only revision ledger, and deterministic
//! synopsis assembly. Callers own connections and actors; the crate owns
//! every invariant.

pub mod assembly;
pub mod config;
pub mod control;
pub mod db;
pub mod dedup;
pub mod error;
pub mod import;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod workflow;

pub use assembly::{ContentTree, JsonRenderer, Renderer};
pub use config::{load_config, CoreConfig};
pub use control::{CancellationToken, OperationControl};
pub use db::{open_db, open_db_in_memory};
pub use error::{CoreError, CoreResult};
pub use ledger::Ledger;
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use model::workflow::{Actor, EntityKind, EntityRef, Transition};
pub use service::{AssemblyService, ClusterService, ImportService};
pub use workflow::{TransitionOutcome, TransitionRequest, WorkflowEngine};

/// Health check for callers wiring the crate.
pub fn ping() -> &'static str {
    "pong"
}

pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
