//! The BUSCO stage pipeline.
//!
//! Each stage reads the files registered by earlier stages from the
//! [`StageContext`](crate::core::StageContext) and registers its own
//! outputs under the keys below.

pub mod fetch;
pub mod parse;
pub mod tools;

use std::path::Path;

use anyhow::{Context, Result};

use crate::adapters::Downloader;
use crate::config::ResolvedConfig;
use crate::core::Pipeline;

pub use fetch::{DecompressStage, DownloadStage};
pub use parse::ParseResultStage;
pub use tools::{AnalyzeStage, ExtractIsoformStage, ExtractProteinStage, NormalizeStage};

// Context file keys
pub const ANNOTATION_GZ: &str = "annotation_gz";
pub const ASSEMBLY_GZ: &str = "assembly_gz";
pub const ANNOTATION: &str = "annotation";
pub const ASSEMBLY: &str = "assembly";
pub const ALIASED_ANNOTATION: &str = "aliased_annotation";
pub const LONGEST_ISOFORM: &str = "longest_isoform";
pub const PROTEINS: &str = "proteins";
pub const BUSCO_OUTPUT: &str = "busco_output";

/// Build the standard seven-stage pipeline from the resolved configuration
pub fn busco_pipeline(config: &ResolvedConfig) -> Result<Pipeline> {
    let downloader = Downloader::new(config.download_timeout())?;
    let tools = &config.tools;

    let pipeline = Pipeline::new()
        .stage(DownloadStage::new(downloader))
        .stage(DecompressStage)
        .stage(NormalizeStage::new(&tools.annocli))
        .stage(ExtractIsoformStage::new(&tools.keep_longest_isoform))
        .stage(ExtractProteinStage::new(&tools.extract_sequences))
        .stage(AnalyzeStage::new(&tools.busco, config.busco.clone()))
        .stage(ParseResultStage::new(&config.busco.lineage));
    pipeline.validate()?;

    Ok(pipeline)
}

/// Fail unless a stage left a non-empty file at `path`
pub(crate) async fn require_output(path: &Path, what: &str) -> Result<()> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Expected {} not found: {}", what, path.display()))?;
    if meta.len() == 0 {
        anyhow::bail!("{} is empty: {}", what, path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StageName;

    #[test]
    fn test_busco_pipeline_stage_order() {
        let config = crate::config::resolve(None, None, |_| None).unwrap();
        let pipeline = busco_pipeline(&config).unwrap();

        assert_eq!(pipeline.stage_names(), StageName::ALL.to_vec());
    }
}
