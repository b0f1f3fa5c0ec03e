//! The stage boundary.
//!
//! A stage is an opaque, fallible step that reads and extends an item-scoped
//! [`StageContext`]. The runner owns the context for the lifetime of one
//! item; nothing in it outlives that item.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Metrics, StageName, WorkItem};

/// Default per-stage time budget (2 hours; BUSCO on large proteomes is slow)
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(7200);

/// One step of the pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage identity, used to label failures
    fn name(&self) -> StageName;

    /// Locators the item must carry for this stage to be attempted
    fn required_locators(&self) -> &[&'static str] {
        &[]
    }

    /// Execute the stage against the item's context
    async fn run(&self, ctx: &mut StageContext) -> Result<()>;
}

/// Item-scoped state threaded from one stage to the next
pub struct StageContext {
    item: Arc<WorkItem>,
    work_dir: PathBuf,
    files: HashMap<&'static str, PathBuf>,
    metrics: Option<Metrics>,
}

impl StageContext {
    /// Create a context rooted at the item's private scratch directory
    pub fn new(item: Arc<WorkItem>, work_dir: PathBuf) -> Self {
        Self {
            item,
            work_dir,
            files: HashMap::new(),
            metrics: None,
        }
    }

    pub fn item(&self) -> &WorkItem {
        &self.item
    }

    /// Scratch directory owned by this item
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Get a required locator
    pub fn locator(&self, name: &str) -> Result<&str> {
        self.item
            .locator(name)
            .ok_or_else(|| anyhow::anyhow!("Work item has no '{}' locator", name))
    }

    /// Register an intermediate file for later stages
    pub fn set_file(&mut self, key: &'static str, path: PathBuf) {
        self.files.insert(key, path);
    }

    /// Get an intermediate file produced by an earlier stage
    pub fn file(&self, key: &str) -> Result<&Path> {
        self.files
            .get(key)
            .map(PathBuf::as_path)
            .ok_or_else(|| anyhow::anyhow!("No '{}' file was produced by an earlier stage", key))
    }

    pub fn set_metrics(&mut self, metrics: Metrics) {
        self.metrics = Some(metrics);
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    pub fn take_metrics(&mut self) -> Option<Metrics> {
        self.metrics.take()
    }
}

/// Time budgets per stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTimeouts {
    /// Budget for stages without an override
    pub default: Duration,

    /// Stage-specific budgets
    pub per_stage: HashMap<StageName, Duration>,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self::new(DEFAULT_STAGE_TIMEOUT)
    }
}

impl StageTimeouts {
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            per_stage: HashMap::new(),
        }
    }

    /// Override the budget of one stage
    pub fn with_override(mut self, stage: StageName, limit: Duration) -> Self {
        self.per_stage.insert(stage, limit);
        self
    }

    /// Get the effective budget for a stage
    pub fn for_stage(&self, stage: StageName) -> Duration {
        self.per_stage.get(&stage).copied().unwrap_or(self.default)
    }
}
