//! Domain types for the batch orchestrator.
//!
//! This module contains the core data structures:
//! - WorkItem: One manifest row to carry through the pipeline
//! - StageName: Pipeline position, used to label failures
//! - Outcome: Terminal result of processing one item

pub mod item;
pub mod outcome;
pub mod stage;

// Re-export commonly used types
pub use item::WorkItem;
pub use outcome::{Metrics, Outcome, StageError};
pub use stage::StageName;
