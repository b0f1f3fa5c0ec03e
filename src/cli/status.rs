//! Ledger status reporting.
//!
//! Read-only: the stores are never opened for writing, so `status` is safe
//! to run while a batch is in progress.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::core::{FailureRecord, SuccessRecord};
use crate::domain::WorkItem;

/// Progress of a manifest against the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Distinct ids in the manifest
    pub manifest_items: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Manifest ids in neither store
    pub pending: usize,
    /// Ledger rows whose id is not in the manifest
    pub not_in_manifest: usize,
    /// Failure counts keyed by failed stage
    pub failures_by_stage: BTreeMap<String, usize>,
}

impl StatusReport {
    pub fn build(
        items: &[WorkItem],
        successes: &[SuccessRecord],
        failures: &[FailureRecord],
    ) -> Self {
        let manifest: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
        let succeeded: HashSet<&str> = successes.iter().map(|r| r.id.as_str()).collect();
        let failed: HashSet<&str> = failures.iter().map(|r| r.id.as_str()).collect();

        let mut failures_by_stage = BTreeMap::new();
        for record in failures {
            *failures_by_stage.entry(record.stage.clone()).or_insert(0) += 1;
        }

        let pending = manifest
            .iter()
            .filter(|id| !succeeded.contains(*id) && !failed.contains(*id))
            .count();
        let not_in_manifest = succeeded
            .union(&failed)
            .filter(|id| !manifest.contains(*id))
            .count();

        Self {
            manifest_items: manifest.len(),
            succeeded: succeeded.len(),
            failed: failed.len(),
            pending,
            not_in_manifest,
            failures_by_stage,
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Manifest items : {}", self.manifest_items)?;
        writeln!(f, "Succeeded      : {}", self.succeeded)?;
        writeln!(f, "Failed         : {}", self.failed)?;
        write!(f, "Pending        : {}", self.pending)?;
        if self.not_in_manifest > 0 {
            write!(f, "\nNot in manifest: {}", self.not_in_manifest)?;
        }
        if !self.failures_by_stage.is_empty() {
            write!(f, "\n\nFailures by stage:")?;
            for (stage, count) in &self.failures_by_stage {
                write!(f, "\n  {:<16} {}", stage, count)?;
            }
        }
        Ok(())
    }
}
