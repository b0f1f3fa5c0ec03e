//! Manifest loading.
//!
//! The manifest is a tab-separated file with a required header. The first
//! column is the work item id; every other column is a named locator.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::domain::WorkItem;

use super::tsv;

/// Errors that prevent the manifest from being used at all
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest has no header row")]
    MissingHeader,

    #[error("Manifest header must start with one of {expected:?}, found '{found}'")]
    InvalidHeader { expected: Vec<&'static str>, found: String },
}

/// Load work items from a manifest file, in file order
pub fn load(path: &Path) -> Result<Vec<WorkItem>, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let items = parse(&content)?;
    info!(manifest = %path.display(), items = items.len(), "Loaded manifest");
    Ok(items)
}

/// Parse manifest content
pub fn parse(content: &str) -> Result<Vec<WorkItem>, ManifestError> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());

    let header_line = lines.next().ok_or(ManifestError::MissingHeader)?;
    if !tsv::is_header(header_line) {
        return Err(ManifestError::InvalidHeader {
            expected: tsv::ID_COLUMNS.to_vec(),
            found: tsv::fields(header_line)
                .first()
                .copied()
                .unwrap_or_default()
                .to_string(),
        });
    }
    let header: Vec<String> = tsv::fields(header_line)
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut items = Vec::new();
    for (line_no, line) in lines.enumerate() {
        let values = tsv::fields(line);
        let id = values.first().map(|v| v.trim()).unwrap_or_default();
        if id.is_empty() {
            // +2: one for the header, one for 1-based numbering
            warn!(row = line_no + 2, "Skipping manifest row without an id");
            continue;
        }

        // Short rows leave trailing locators empty; validation catches them later
        let locators = header.iter().enumerate().skip(1).map(|(i, name)| {
            let value = values.get(i).map(|v| v.trim()).unwrap_or_default();
            (name.clone(), value.to_string())
        });

        items.push(WorkItem::new(id, locators));
    }

    Ok(items)
}
