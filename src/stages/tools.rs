//! Stages that shell out to annocli, AGAT and BUSCO.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::adapters::ToolCommand;
use crate::config::BuscoSettings;
use crate::core::{Stage, StageContext};
use crate::domain::StageName;

use super::{
    require_output, ALIASED_ANNOTATION, ANNOTATION, ASSEMBLY, BUSCO_OUTPUT, LONGEST_ISOFORM,
    PROTEINS,
};

/// Rename annotation sequence ids to the assembly's (`annocli alias`)
pub struct NormalizeStage {
    program: String,
}

impl NormalizeStage {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Stage for NormalizeStage {
    fn name(&self) -> StageName {
        StageName::Normalize
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<()> {
        let output = ctx.work_dir().join("aliased_annotation.gff");
        ToolCommand::new(&self.program)
            .arg("alias")
            .arg(ctx.file(ANNOTATION)?)
            .arg(ctx.file(ASSEMBLY)?)
            .arg("--output")
            .arg(&output)
            .run()
            .await?;

        require_output(&output, "aliased annotation").await?;
        ctx.set_file(ALIASED_ANNOTATION, output);
        Ok(())
    }
}

/// Keep the longest isoform per gene (`agat_sp_keep_longest_isoform.pl`)
pub struct ExtractIsoformStage {
    program: String,
}

impl ExtractIsoformStage {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Stage for ExtractIsoformStage {
    fn name(&self) -> StageName {
        StageName::ExtractIsoform
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<()> {
        let output = ctx.work_dir().join("longest_isoform.gff");
        ToolCommand::new(&self.program)
            .arg("-gff")
            .arg(ctx.file(ALIASED_ANNOTATION)?)
            .arg("-o")
            .arg(&output)
            .current_dir(ctx.work_dir())
            .run()
            .await?;

        require_output(&output, "longest isoform annotation").await?;
        ctx.set_file(LONGEST_ISOFORM, output);
        Ok(())
    }
}

/// Translate CDS features into proteins (`agat_sp_extract_sequences.pl`)
pub struct ExtractProteinStage {
    program: String,
}

impl ExtractProteinStage {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Stage for ExtractProteinStage {
    fn name(&self) -> StageName {
        StageName::ExtractProtein
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<()> {
        let output = ctx.work_dir().join("proteins.faa");
        ToolCommand::new(&self.program)
            .arg("-f")
            .arg(ctx.file(ASSEMBLY)?)
            .arg("-g")
            .arg(ctx.file(LONGEST_ISOFORM)?)
            .args(["-t", "CDS", "-p", "-o"])
            .arg(&output)
            .current_dir(ctx.work_dir())
            .run()
            .await?;

        // AGAT can exit 0 without writing anything when no CDS matched
        require_output(&output, "protein file").await?;
        ctx.set_file(PROTEINS, output);
        Ok(())
    }
}

/// Run BUSCO in protein mode against the configured lineage
pub struct AnalyzeStage {
    program: String,
    settings: BuscoSettings,
}

impl AnalyzeStage {
    pub fn new(program: impl Into<String>, settings: BuscoSettings) -> Self {
        Self {
            program: program.into(),
            settings,
        }
    }

    /// Resolve the `-l` argument.
    ///
    /// A local dataset directory is preferred; without one, the bare lineage
    /// name is passed so BUSCO can download it, unless running offline.
    pub fn lineage_arg(&self) -> Result<String> {
        let candidates = lineage_candidates(&self.settings);
        if let Some(found) = candidates.iter().find(|p| p.is_dir()) {
            // BUSCO runs inside the scratch directory, so relative paths break
            let path = found.canonicalize().unwrap_or_else(|_| found.clone());
            debug!(lineage = %path.display(), "Using local lineage dataset");
            return Ok(path.to_string_lossy().into_owned());
        }

        if self.settings.offline {
            let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
            anyhow::bail!(
                "Lineage dataset '{}' not found (offline). Tried: {}",
                self.settings.lineage,
                tried.join(", ")
            );
        }
        Ok(self.settings.lineage.clone())
    }
}

fn lineage_candidates(settings: &BuscoSettings) -> Vec<PathBuf> {
    let lineage = &settings.lineage;
    let mut candidates = Vec::new();
    if let Some(dir) = &settings.lineage_dir {
        candidates.push(dir.join(lineage));
    }
    candidates.push(Path::new("busco_downloads").join("lineages").join(lineage));
    candidates.push(PathBuf::from(lineage));
    candidates
}

#[async_trait]
impl Stage for AnalyzeStage {
    fn name(&self) -> StageName {
        StageName::Analyze
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<()> {
        let lineage = self.lineage_arg()?;
        let proteins = ctx.file(PROTEINS)?.to_path_buf();

        let mut command = ToolCommand::new(&self.program)
            .args(["-m", "protein", "-i"])
            .arg(&proteins)
            .arg("-l")
            .arg(&lineage)
            .args(["-o", BUSCO_OUTPUT, "-c"])
            .arg(self.settings.cpu.to_string())
            .current_dir(ctx.work_dir());
        if self.settings.offline {
            command = command.arg("--offline");
        }
        command.run().await?;

        let output = ctx.work_dir().join(BUSCO_OUTPUT);
        if !output.is_dir() {
            anyhow::bail!("BUSCO output directory not found: {}", output.display());
        }
        info!(%lineage, "BUSCO analysis finished");
        ctx.set_file(BUSCO_OUTPUT, output);
        Ok(())
    }
}
