//! Import front end: interchange reading and record normalization.
//!
//! Both stages are pure; persistence, duplicate scanning and quarantine are
//! driven by `service::import_service`.

pub mod normalizer;
pub mod ris;

pub use normalizer::{Normalizer, RawRecord, RawValue};
pub use ris::RisReader;
