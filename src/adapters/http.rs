//! Input retrieval over HTTP(S) or from the local filesystem.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Default whole-request timeout for one download
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Fetches work item inputs into scratch space
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("buscobatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Fetch `locator` into `dest`, returning the number of bytes written.
    ///
    /// Accepts `http://`, `https://`, `file://` and plain filesystem paths.
    pub async fn fetch(&self, locator: &str, dest: &Path) -> Result<u64> {
        let written = match Source::parse(locator)? {
            Source::Remote(url) => self.fetch_remote(url, dest).await?,
            Source::Local(path) => tokio::fs::copy(&path, dest)
                .await
                .with_context(|| format!("Failed to copy {}", path.display()))?,
        };

        if written == 0 {
            anyhow::bail!("Downloaded file is empty: {}", locator);
        }
        debug!(locator, bytes = written, dest = %dest.display(), "Fetched input");
        Ok(written)
    }

    async fn fetch_remote(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {} downloading {}", status, url);
        }

        let mut file = File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.with_context(|| format!("Failed reading body of {}", url))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .with_context(|| format!("Failed to write {}", dest.display()))?;

        Ok(written)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Source<'a> {
    Remote(&'a str),
    Local(PathBuf),
}

impl<'a> Source<'a> {
    fn parse(locator: &'a str) -> Result<Self> {
        let locator = locator.trim();
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return Ok(Self::Remote(locator));
        }
        if let Some(path) = locator.strip_prefix("file://") {
            return Ok(Self::Local(PathBuf::from(path)));
        }
        match locator.split_once("://") {
            Some((scheme, _)) => anyhow::bail!("Unsupported URL scheme '{}' in {}", scheme, locator),
            None => Ok(Self::Local(PathBuf::from(locator))),
        }
    }
}
