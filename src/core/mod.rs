//! Core orchestration logic.
//!
//! This module contains:
//! - Ledger: Durable success/failure stores and the skip-set
//! - Manifest: Work item loading
//! - Stage / Pipeline: The ordered stage boundary
//! - PipelineRunner: Per-item execution in scratch space
//! - Orchestrator: Batch dispatch and outcome recording

pub mod ledger;
pub mod manifest;
pub mod orchestrator;
pub mod pipeline;
pub mod runner;
pub mod stage;
pub mod tsv;

// Re-export commonly used types
pub use ledger::{FailureRecord, Ledger, LedgerError, LedgerPaths, MergeStats, SuccessRecord};
pub use manifest::ManifestError;
pub use orchestrator::{plan_dispatch, Chunk, DispatchOptions, DispatchPlan, Orchestrator, RunSummary};
pub use pipeline::Pipeline;
pub use runner::PipelineRunner;
pub use stage::{Stage, StageContext, StageTimeouts, DEFAULT_STAGE_TIMEOUT};
