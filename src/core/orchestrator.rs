//! Batch orchestration.
//!
//! Filters the manifest against the ledger, dispatches pending items to the
//! [`PipelineRunner`] with bounded concurrency, and records each outcome as
//! soon as it is known. A failed item never stops the batch; only ledger
//! infrastructure errors do.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Outcome, WorkItem};

use super::ledger::{Ledger, LedgerError};
use super::runner::PipelineRunner;

/// A strided slice of the pending set: items `index`, `index + count`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub count: usize,
}

impl Chunk {
    pub fn new(index: usize, count: usize) -> Result<Self, String> {
        if count == 0 {
            return Err("chunk count must be at least 1".to_string());
        }
        if index >= count {
            return Err(format!(
                "chunk index {} is out of range for {} chunks",
                index, count
            ));
        }
        Ok(Self { index, count })
    }

    /// Keep only this chunk's share of `items`, preserving order
    pub fn select<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.index)
            .step_by(self.count)
            .collect()
    }
}

impl FromStr for Chunk {
    type Err = String;

    /// Parse `INDEX/COUNT`, e.g. `0/4`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, count) = s
            .split_once('/')
            .ok_or_else(|| format!("expected INDEX/COUNT, got '{}'", s))?;
        let index = index
            .trim()
            .parse()
            .map_err(|_| format!("invalid chunk index '{}'", index))?;
        let count = count
            .trim()
            .parse()
            .map_err(|_| format!("invalid chunk count '{}'", count))?;
        Self::new(index, count)
    }
}

/// How pending items are dispatched
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Maximum items in flight (1 = sequential)
    pub concurrency: usize,

    /// Process only one strided chunk of the pending items
    pub chunk: Option<Chunk>,

    /// Process at most this many pending items (after chunking)
    pub limit: Option<usize>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            chunk: None,
            limit: None,
        }
    }
}

/// The items selected for this run
#[derive(Debug, Clone, Default)]
pub struct DispatchPlan {
    /// Items to run, in manifest order
    pub pending: Vec<WorkItem>,

    /// Manifest rows
    pub total: usize,

    /// Rows whose id is already in the ledger
    pub already_recorded: usize,

    /// Rows repeating an id seen earlier in the manifest
    pub duplicates_in_manifest: usize,

    /// Pending items left for another chunk or a later run
    pub deferred: usize,
}

/// Compute which items to run: manifest order minus the skip-set, then
/// chunking and the limit.
pub fn plan_dispatch(
    items: Vec<WorkItem>,
    known: &HashSet<String>,
    options: &DispatchOptions,
) -> DispatchPlan {
    let mut plan = DispatchPlan {
        total: items.len(),
        ..Default::default()
    };

    // Learned as we go, so a repeated id is only dispatched once
    let mut seen = HashSet::new();
    let mut pending = Vec::new();
    for item in items {
        if known.contains(&item.id) {
            plan.already_recorded += 1;
        } else if !seen.insert(item.id.clone()) {
            warn!(item = %item.id, "Duplicate id in manifest, skipping repeat");
            plan.duplicates_in_manifest += 1;
        } else {
            pending.push(item);
        }
    }

    let eligible = pending.len();
    if let Some(chunk) = options.chunk {
        pending = chunk.select(pending);
    }
    if let Some(limit) = options.limit {
        pending.truncate(limit);
    }

    plan.deferred = eligible - pending.len();
    plan.pending = pending;
    plan
}

/// Counts reported at the end of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub already_recorded: usize,
    pub duplicates_in_manifest: usize,
    pub deferred: usize,
    pub dispatched: usize,
    /// Success rows written by this run
    pub succeeded: usize,
    /// Failure rows written by this run
    pub failed: usize,
    /// Outcomes the ledger refused as duplicates
    pub ledger_conflicts: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}", self.run_id)?;
        writeln!(f, "  Manifest items   : {}", self.total)?;
        writeln!(f, "  Already recorded : {}", self.already_recorded)?;
        if self.duplicates_in_manifest > 0 {
            writeln!(f, "  Duplicate ids    : {}", self.duplicates_in_manifest)?;
        }
        if self.deferred > 0 {
            writeln!(f, "  Deferred         : {}", self.deferred)?;
        }
        writeln!(f, "  Processed        : {}", self.dispatched)?;
        writeln!(f, "  Succeeded        : {}", self.succeeded)?;
        write!(f, "  Failed           : {}", self.failed)?;
        if self.ledger_conflicts > 0 {
            write!(f, "\n  Ledger conflicts : {}", self.ledger_conflicts)?;
        }
        Ok(())
    }
}

/// Main batch orchestrator
pub struct Orchestrator {
    runner: PipelineRunner,
    options: DispatchOptions,
}

impl Orchestrator {
    pub fn new(runner: PipelineRunner, options: DispatchOptions) -> Self {
        Self { runner, options }
    }

    /// Process every pending item and record its outcome.
    ///
    /// Fails only if the ledger cannot be read or written.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn process(&self, items: Vec<WorkItem>, ledger: &Ledger) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        let started_at = Utc::now();

        let known = ledger.load().context("Failed to load ledger")?;
        let plan = plan_dispatch(items, &known, &self.options);

        info!(
            total = plan.total,
            already_recorded = plan.already_recorded,
            pending = plan.pending.len(),
            deferred = plan.deferred,
            concurrency = self.options.concurrency.max(1),
            "Starting batch"
        );

        let mut summary = RunSummary {
            run_id,
            started_at,
            finished_at: started_at,
            total: plan.total,
            already_recorded: plan.already_recorded,
            duplicates_in_manifest: plan.duplicates_in_manifest,
            deferred: plan.deferred,
            dispatched: plan.pending.len(),
            succeeded: 0,
            failed: 0,
            ledger_conflicts: 0,
        };

        let dispatched = summary.dispatched;
        let runner = &self.runner;
        let mut outcomes = stream::iter(plan.pending.into_iter().enumerate())
            .map(|(idx, item)| async move {
                let item = Arc::new(item);
                info!(item = %item.id, "[{}/{}] Processing", idx + 1, dispatched);
                let outcome = runner.run(Arc::clone(&item)).await;
                (item, outcome)
            })
            .buffer_unordered(self.options.concurrency.max(1));

        // Outcomes are recorded here, one at a time, as items finish
        while let Some((item, outcome)) = outcomes.next().await {
            record_outcome(ledger, &item, &outcome, &mut summary)?;
        }

        summary.finished_at = Utc::now();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            ledger_conflicts = summary.ledger_conflicts,
            "Batch complete"
        );

        Ok(summary)
    }
}

fn record_outcome(
    ledger: &Ledger,
    item: &WorkItem,
    outcome: &Outcome,
    summary: &mut RunSummary,
) -> Result<()> {
    let recorded = match outcome {
        Outcome::Success(metrics) => {
            info!(item = %item.id, complete_pct = metrics.complete_pct, "✓ Succeeded");
            ledger.record_success(&item.id, metrics)
        }
        Outcome::Failure(failure) => {
            warn!(item = %item.id, stage = %failure.stage(), error = %failure, "✗ Failed");
            ledger.record_failure(&item.id, failure.stage(), &failure.to_string())
        }
    };

    match recorded {
        Ok(()) => {
            match outcome {
                Outcome::Success(_) => summary.succeeded += 1,
                Outcome::Failure(_) => summary.failed += 1,
            }
            Ok(())
        }
        Err(LedgerError::DuplicateEntry(id)) => {
            error!(item = %id, "Outcome not recorded: id already in ledger");
            summary.ledger_conflicts += 1;
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to record outcome for '{}'", item.id)),
    }
}
