// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod render;
pub mod retry;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::config::Settings;
pub use crate::error::{PipelineError, PipelineResult, StoreError};
pub use crate::ingest::types::{Item, ItemKey, SourceKind};
pub use crate::pipeline::{CycleReport, Orchestrator};
pub use crate::store::{DedupStore, DryRunStore, RecordStatus, SqliteDedupStore};
