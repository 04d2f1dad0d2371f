//! notemerge core library.
//!
//! This crate resolves the conflicts left in a merged set of structured notes:
//! the merge-result model, conflict indexing, decision tracking, anchor-based
//! reconciliation of the merged text, the resolution engine, configuration,
//! and the runner for the external merge producer.

pub mod config;
pub mod conflict;
pub mod engine;
pub mod errors;
pub mod model;
pub mod producer;

// Re-exports for convenience.
pub use config::{AlternativePolicy, AppConfig};
pub use conflict::{Choice, ConflictKey, ConflictKind, ConflictSite, Resolution};
pub use engine::{EngineEvent, ResolutionEngine, ResolveCommand, SessionState};
pub use model::MergeResult;
pub use producer::{MergeProducer, ProcessProducer};
