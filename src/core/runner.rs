//! Per-item pipeline execution.
//!
//! Runs the ordered stages of a [`Pipeline`] for one work item inside a
//! private scratch directory and reduces whatever happens into a single
//! [`Outcome`]. Nothing raised by a stage escapes `run`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use futures::FutureExt;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::domain::{Outcome, StageError, WorkItem};

use super::pipeline::Pipeline;
use super::stage::{StageContext, StageTimeouts};

/// Executes a pipeline for one work item at a time
pub struct PipelineRunner {
    pipeline: Pipeline,
    timeouts: StageTimeouts,
    scratch_root: PathBuf,
}

impl PipelineRunner {
    /// Create a runner; the pipeline is validated up front
    pub fn new(pipeline: Pipeline, timeouts: StageTimeouts) -> Result<Self> {
        pipeline.validate()?;

        Ok(Self {
            pipeline,
            timeouts,
            scratch_root: std::env::temp_dir(),
        })
    }

    /// Allocate item scratch directories under `root` instead of the system
    /// temp directory
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    /// Run every stage for `item`, stopping at the first failure
    #[instrument(skip(self, item), fields(item = %item.id))]
    pub async fn run(&self, item: Arc<WorkItem>) -> Outcome {
        if let Err(error) = self.validate_item(&item) {
            warn!(stage = %error.stage(), %error, "Work item failed validation");
            return Outcome::Failure(error);
        }

        let first_stage = self.pipeline.stage_names()[0];
        let scratch = match tempfile::Builder::new()
            .prefix(&format!("busco_{}_", scratch_prefix(&item.id)))
            .tempdir_in(&self.scratch_root)
        {
            Ok(dir) => dir,
            Err(e) => {
                let error = StageError::failed(
                    first_stage,
                    format!(
                        "Failed to allocate scratch directory under {}: {}",
                        self.scratch_root.display(),
                        e
                    ),
                );
                warn!(%error, "Work item not started");
                return Outcome::Failure(error);
            }
        };
        debug!(work_dir = %scratch.path().display(), "Allocated scratch directory");

        let mut ctx = StageContext::new(item, scratch.path().to_path_buf());
        let outcome = self.execute(&mut ctx).await;
        drop(ctx);

        let work_dir = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(work_dir = %work_dir.display(), error = %e, "Failed to remove scratch directory");
        } else {
            debug!(work_dir = %work_dir.display(), "Removed scratch directory");
        }

        outcome
    }

    /// Check every stage's required locators before anything runs
    fn validate_item(&self, item: &WorkItem) -> Result<(), StageError> {
        for stage in self.pipeline.stages() {
            for &locator in stage.required_locators() {
                if item.locator(locator).is_none() {
                    return Err(StageError::Validation {
                        stage: stage.name(),
                        locator: locator.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn execute(&self, ctx: &mut StageContext) -> Outcome {
        for stage in self.pipeline.stages() {
            let name = stage.name();
            let limit = self.timeouts.for_stage(name);
            let started = Instant::now();
            debug!(stage = %name, timeout_secs = limit.as_secs(), "Stage started");

            let result = timeout(limit, AssertUnwindSafe(stage.run(ctx)).catch_unwind()).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let error = match result {
                Ok(Ok(Ok(()))) => {
                    info!(stage = %name, elapsed_ms, "Stage completed");
                    continue;
                }
                Ok(Ok(Err(e))) => StageError::failed(name, format!("{:#}", e)),
                Ok(Err(panic)) => StageError::failed(
                    name,
                    format!("stage panicked: {}", panic_message(panic.as_ref())),
                ),
                Err(_) => StageError::Timeout { stage: name, limit },
            };

            warn!(stage = %name, elapsed_ms, %error, "Stage failed");
            return Outcome::Failure(error);
        }

        match ctx.take_metrics() {
            Some(metrics) => Outcome::Success(metrics),
            None => {
                let last = self.pipeline.stage_names()[self.pipeline.stages().len() - 1];
                Outcome::Failure(StageError::failed(
                    last,
                    "pipeline finished without producing metrics",
                ))
            }
        }
    }
}

/// Keep scratch directory names filesystem-safe whatever the id contains
fn scratch_prefix(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
