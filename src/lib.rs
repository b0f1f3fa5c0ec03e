//! buscobatch - Resumable BUSCO batch orchestrator
//!
//! Drives genome annotations listed in a manifest through a fixed chain of
//! external tools (download, decompress, annocli alias, AGAT isoform and
//! protein extraction, BUSCO, summary parsing) and records exactly one
//! outcome per annotation in a durable ledger.
//!
//! # Architecture
//!
//! The ledger is the only state that survives a run:
//! - Successes and failures are appended to two TSV stores
//! - Anything already recorded is skipped on the next run
//! - A failure names the stage that failed and is never retried
//!
//! # Modules
//!
//! - `adapters`: External tools, downloads, gzip, BUSCO summaries
//! - `core`: Orchestration logic (Ledger, Pipeline, Runner, Orchestrator)
//! - `domain`: Data structures (WorkItem, StageName, Outcome)
//! - `stages`: The seven BUSCO pipeline stages
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Process everything not yet recorded
//! buscobatch run --manifest annotations.tsv
//!
//! # Check progress
//! buscobatch status --manifest annotations.tsv
//!
//! # Fold chunked job ledgers into the main one
//! buscobatch merge fragments/
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod stages;

// Re-export main types at crate root for convenience
pub use core::{Ledger, LedgerPaths, Orchestrator, Pipeline, PipelineRunner, RunSummary, Stage, StageContext};
pub use domain::{Metrics, Outcome, StageError, StageName, WorkItem};
