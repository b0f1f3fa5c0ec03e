//! Work items loaded from the manifest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Locator of the gzipped GFF3 annotation
pub const ANNOTATION_URL: &str = "annotation_url";

/// Locator of the gzipped FASTA assembly
pub const ASSEMBLY_URL: &str = "assembly_url";

/// One unit of input carried through the stage pipeline.
///
/// Immutable once loaded; stages only ever read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier (first manifest column)
    pub id: String,

    /// Named resource locators (remaining manifest columns)
    pub locators: BTreeMap<String, String>,
}

impl WorkItem {
    /// Create a work item from an id and its locators
    pub fn new<I, K, V>(id: impl Into<String>, locators: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            locators: locators
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Get a locator by name, treating blank values as absent
    pub fn locator(&self, name: &str) -> Option<&str> {
        self.locators
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}
