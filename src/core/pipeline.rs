//! Pipeline definitions.
//!
//! A pipeline is an ordered list of stage descriptors. The runner walks the
//! list generically, so stages can be added, removed or reordered here
//! without touching orchestration.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;

use crate::domain::StageName;

use super::stage::Stage;

/// An ordered list of stages
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Append a shared stage
    pub fn shared_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Validate the pipeline definition
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            anyhow::bail!("Pipeline must have at least one stage");
        }

        // Failures are labelled by stage name, so names must be unambiguous
        let mut seen = HashSet::new();
        for name in self.stage_names() {
            if !seen.insert(name) {
                anyhow::bail!("Stage '{}' appears more than once in the pipeline", name);
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
