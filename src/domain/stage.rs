//! Stage identity.
//!
//! The derived ordering of [`StageName`] is the execution order of the
//! standard pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Position of a stage in the pipeline
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Fetch the annotation and assembly archives
    Download,

    /// Gunzip the downloaded archives
    Decompress,

    /// Rewrite annotation sequence ids to match the assembly (annocli alias)
    Normalize,

    /// Keep the longest isoform per gene (AGAT)
    ExtractIsoform,

    /// Translate CDS features into protein sequences (AGAT)
    ExtractProtein,

    /// Run BUSCO in protein mode
    Analyze,

    /// Read the BUSCO short summary
    ParseResult,
}

impl StageName {
    /// All stages in execution order
    pub const ALL: [StageName; 7] = [
        StageName::Download,
        StageName::Decompress,
        StageName::Normalize,
        StageName::ExtractIsoform,
        StageName::ExtractProtein,
        StageName::Analyze,
        StageName::ParseResult,
    ];

    /// Name as persisted in the failure store
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Decompress => "decompress",
            Self::Normalize => "normalize",
            Self::ExtractIsoform => "extract_isoform",
            Self::ExtractProtein => "extract_protein",
            Self::Analyze => "analyze",
            Self::ParseResult => "parse_result",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown stage name: '{}'", s))
    }
}
