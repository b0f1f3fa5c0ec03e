//! Input retrieval stages.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::adapters::{gzip, Downloader};
use crate::core::{Stage, StageContext};
use crate::domain::item::{ANNOTATION_URL, ASSEMBLY_URL};
use crate::domain::StageName;

use super::{ANNOTATION, ANNOTATION_GZ, ASSEMBLY, ASSEMBLY_GZ};

/// Fetch the gzipped annotation and assembly into scratch space
pub struct DownloadStage {
    downloader: Downloader,
}

impl DownloadStage {
    pub fn new(downloader: Downloader) -> Self {
        Self { downloader }
    }
}

#[async_trait]
impl Stage for DownloadStage {
    fn name(&self) -> StageName {
        StageName::Download
    }

    fn required_locators(&self) -> &[&'static str] {
        &[ANNOTATION_URL, ASSEMBLY_URL]
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<()> {
        for (locator, key, file_name) in [
            (ANNOTATION_URL, ANNOTATION_GZ, "annotation.gff.gz"),
            (ASSEMBLY_URL, ASSEMBLY_GZ, "assembly.fna.gz"),
        ] {
            let url = ctx.locator(locator)?.to_string();
            let dest = ctx.work_dir().join(file_name);
            let bytes = self.downloader.fetch(&url, &dest).await?;
            info!(%url, bytes, "Downloaded {}", file_name);
            ctx.set_file(key, dest);
        }
        Ok(())
    }
}

/// Gunzip the downloaded inputs
pub struct DecompressStage;

#[async_trait]
impl Stage for DecompressStage {
    fn name(&self) -> StageName {
        StageName::Decompress
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<()> {
        for (src_key, key, file_name) in [
            (ANNOTATION_GZ, ANNOTATION, "annotation.gff"),
            (ASSEMBLY_GZ, ASSEMBLY, "assembly.fna"),
        ] {
            let src = ctx.file(src_key)?.to_path_buf();
            let dest = ctx.work_dir().join(file_name);
            gzip::decompress(&src, &dest)
                .await
                .with_context(|| format!("Failed to unzip {}", src.display()))?;
            ctx.set_file(key, dest);
        }
        Ok(())
    }
}
