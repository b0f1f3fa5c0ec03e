//! Result extraction.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::adapters::busco::{find_summary, parse_summary};
use crate::core::{Stage, StageContext};
use crate::domain::StageName;

use super::BUSCO_OUTPUT;

/// Read the BUSCO short summary into the item's metrics
pub struct ParseResultStage {
    lineage: String,
}

impl ParseResultStage {
    /// `lineage` is reported if the summary does not name one
    pub fn new(lineage: impl Into<String>) -> Self {
        Self {
            lineage: lineage.into(),
        }
    }
}

#[async_trait]
impl Stage for ParseResultStage {
    fn name(&self) -> StageName {
        StageName::ParseResult
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<()> {
        let summary = find_summary(ctx.file(BUSCO_OUTPUT)?)?;
        debug!(summary = %summary.display(), "Reading BUSCO summary");

        let content = tokio::fs::read_to_string(&summary)
            .await
            .with_context(|| format!("Failed to read {}", summary.display()))?;
        let metrics = parse_summary(&content, &self.lineage)?;

        ctx.set_metrics(metrics);
        Ok(())
    }
}
