//! Terminal outcomes of processing one work item.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::stage::StageName;

/// BUSCO completeness figures for one annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Lineage dataset the analysis ran against (e.g. eukaryota_odb12)
    pub reference_lineage: String,

    /// Number of BUSCO groups searched
    pub group_count: u32,

    /// Complete BUSCOs (single + duplicated)
    pub complete_pct: f64,

    /// Complete and single-copy
    pub single_pct: f64,

    /// Complete and duplicated
    pub duplicated_pct: f64,

    /// Fragmented
    pub fragmented_pct: f64,

    /// Missing
    pub missing_pct: f64,
}

/// Why an item's pipeline stopped.
///
/// Every failure is attributed to exactly one stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The item lacks a locator the stage needs; the stage was never attempted
    #[error("missing required locator '{locator}'")]
    Validation { stage: StageName, locator: String },

    /// The stage's external collaborator failed
    #[error("{message}")]
    Failed { stage: StageName, message: String },

    /// The stage exceeded its time budget
    #[error("timed out after {}s", .limit.as_secs())]
    Timeout { stage: StageName, limit: Duration },
}

impl StageError {
    /// Create a collaborator failure for a stage
    pub fn failed(stage: StageName, message: impl Into<String>) -> Self {
        Self::Failed {
            stage,
            message: message.into(),
        }
    }

    /// Stage the failure is attributed to
    pub fn stage(&self) -> StageName {
        match self {
            Self::Validation { stage, .. }
            | Self::Failed { stage, .. }
            | Self::Timeout { stage, .. } => *stage,
        }
    }

    /// Check if the failure was a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result of running one work item through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// All stages completed
    Success(Metrics),

    /// A stage failed; later stages did not run
    Failure(StageError),
}

impl Outcome {
    /// Check if the outcome is a success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}
