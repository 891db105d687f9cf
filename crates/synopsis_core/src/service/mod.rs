//! Use-case services over the engine and repositories.
//!
//! # Responsibility
//! - Orchestrate repository, ledger and engine calls into caller-level
//!   operations: batch import, cluster decisions, synopsis assembly.
//! - Keep storage transactions and lock ordering out of callers' hands.

pub mod assembly_service;
pub mod cluster_service;
pub mod import_service;

pub use assembly_service::{AssemblyService, CompiledSynopsis, Staleness};
pub use cluster_service::ClusterService;
pub use import_service::{ImportReport, ImportService, RecordOutcome, RecordResult};
