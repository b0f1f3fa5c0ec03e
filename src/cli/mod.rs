//! Command-line interface for buscobatch.
//!
//! Provides commands for running a batch, checking ledger status, merging
//! fragment ledgers from chunked jobs, and showing the configuration.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::config;
use crate::core::ledger::{read_failures, read_successes};
use crate::core::{manifest, Chunk, DispatchOptions, Ledger, LedgerPaths, Orchestrator, PipelineRunner};
use crate::stages::busco_pipeline;

pub mod status;

use status::StatusReport;

/// Fragment store names looked for by `merge`
const FRAGMENT_SUCCESS: &str = "success.tsv";
const FRAGMENT_FAILURE: &str = "failure.tsv";

/// buscobatch - Resumable BUSCO batch orchestrator
#[derive(Parser, Debug)]
#[command(name = "buscobatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process every manifest item not yet in the ledger
    Run(RunArgs),

    /// Show ledger progress against a manifest
    Status {
        /// Manifest file (TSV with id/annotation_id header)
        #[arg(short, long)]
        manifest: PathBuf,

        #[command(flatten)]
        ledger: LedgerArgs,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge fragment ledgers (success.tsv / failure.tsv) found under a directory
    Merge {
        /// Directory searched recursively for fragment stores
        fragment_dir: PathBuf,

        #[command(flatten)]
        ledger: LedgerArgs,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Ledger store locations
#[derive(Args, Debug, Clone)]
pub struct LedgerArgs {
    /// Success store (TSV)
    #[arg(long, env = "BUSCOBATCH_SUCCESS_STORE", default_value = "busco_results.tsv")]
    pub success_store: PathBuf,

    /// Failure store (TSV)
    #[arg(long, env = "BUSCOBATCH_FAILURE_STORE", default_value = "busco_failures.tsv")]
    pub failure_store: PathBuf,
}

impl LedgerArgs {
    pub fn paths(&self) -> LedgerPaths {
        LedgerPaths::new(&self.success_store, &self.failure_store)
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Manifest file (TSV with id/annotation_id header)
    #[arg(short, long)]
    pub manifest: PathBuf,

    #[command(flatten)]
    pub ledger: LedgerArgs,

    /// Items processed at once (overrides config)
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Default per-stage timeout in seconds (overrides config)
    #[arg(long)]
    pub stage_timeout: Option<u64>,

    /// Only process chunk INDEX of COUNT (e.g. 0/4)
    #[arg(long, value_name = "INDEX/COUNT")]
    pub chunk: Option<Chunk>,

    /// Process at most this many pending items
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Root for per-item scratch directories (overrides config)
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(args) => run_batch(args).await,
            Commands::Status {
                manifest,
                ledger,
                json,
            } => show_status(&manifest, &ledger, json),
            Commands::Merge {
                fragment_dir,
                ledger,
            } => merge_fragments(&fragment_dir, &ledger),
            Commands::Config => show_config(),
        }
    }
}

/// Run the batch over the manifest
async fn run_batch(args: RunArgs) -> Result<()> {
    let cfg = config::config()?;

    let concurrency = args.concurrency.unwrap_or(cfg.run.concurrency);
    if concurrency == 0 {
        anyhow::bail!("--concurrency must be at least 1");
    }

    let mut timeouts = cfg.stage_timeouts();
    if let Some(secs) = args.stage_timeout {
        timeouts.default = Duration::from_secs(secs);
    }

    let scratch_dir = args
        .scratch_dir
        .unwrap_or_else(|| cfg.run.scratch_dir.clone());
    std::fs::create_dir_all(&scratch_dir)
        .with_context(|| format!("Failed to create scratch directory: {}", scratch_dir.display()))?;

    let items = manifest::load(&args.manifest)?;
    let ledger = Ledger::open(args.ledger.paths()).context("Failed to open ledger")?;

    let runner = PipelineRunner::new(busco_pipeline(cfg)?, timeouts)?.with_scratch_root(&scratch_dir);
    let orchestrator = Orchestrator::new(
        runner,
        DispatchOptions {
            concurrency,
            chunk: args.chunk,
            limit: args.limit,
        },
    );

    let summary = orchestrator.process(items, &ledger).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary);
    }

    Ok(())
}

/// Report progress without opening the stores for writing
fn show_status(manifest_path: &Path, ledger: &LedgerArgs, json: bool) -> Result<()> {
    let items = manifest::load(manifest_path)?;
    let successes = read_successes(&ledger.success_store)?;
    let failures = read_failures(&ledger.failure_store)?;

    let report = StatusReport::build(&items, &successes, &failures);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }

    Ok(())
}

/// Merge every fragment ledger found under `fragment_dir`
fn merge_fragments(fragment_dir: &Path, ledger_args: &LedgerArgs) -> Result<()> {
    if !fragment_dir.is_dir() {
        anyhow::bail!("Fragment directory not found: {}", fragment_dir.display());
    }

    let ledger = Ledger::open(ledger_args.paths()).context("Failed to open ledger")?;
    let own = [
        canonical(&ledger.paths().success),
        canonical(&ledger.paths().failure),
    ];

    let fragments = find_fragments(fragment_dir)?;
    if fragments.is_empty() {
        println!("No fragment ledgers found under {}", fragment_dir.display());
        return Ok(());
    }

    let mut total = crate::core::MergeStats::default();
    for fragment in fragments {
        if own.contains(&canonical(&fragment.success)) || own.contains(&canonical(&fragment.failure)) {
            warn!(fragment = %fragment.success.display(), "Skipping the target ledger itself");
            continue;
        }

        let stats = ledger
            .merge_from(&fragment)
            .with_context(|| format!("Failed to merge {}", fragment.success.display()))?;
        info!(
            fragment = %fragment.success.parent().unwrap_or(Path::new(".")).display(),
            successes = stats.merged_successes,
            failures = stats.merged_failures,
            skipped = stats.skipped,
            "Merged fragment"
        );

        total.merged_successes += stats.merged_successes;
        total.merged_failures += stats.merged_failures;
        total.skipped += stats.skipped;
    }

    println!("Merged successes : {}", total.merged_successes);
    println!("Merged failures  : {}", total.merged_failures);
    println!("Already recorded : {}", total.skipped);

    Ok(())
}

/// Directories holding a success.tsv or failure.tsv, as ledger pairs
fn find_fragments(dir: &Path) -> Result<Vec<LedgerPaths>> {
    let base = glob::Pattern::escape(&dir.to_string_lossy());
    let mut dirs = BTreeSet::new();

    for name in [FRAGMENT_SUCCESS, FRAGMENT_FAILURE] {
        let pattern = format!("{}/**/{}", base, name);
        for entry in glob::glob(&pattern).with_context(|| format!("Invalid pattern {}", pattern))? {
            let path = entry.context("Failed to scan fragment directory")?;
            if let Some(parent) = path.parent() {
                dirs.insert(parent.to_path_buf());
            }
        }
    }

    Ok(dirs
        .into_iter()
        .map(|d| LedgerPaths::new(d.join(FRAGMENT_SUCCESS), d.join(FRAGMENT_FAILURE)))
        .collect())
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("buscobatch configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    print!("{}", serde_yaml::to_string(cfg).context("Failed to render configuration")?);

    Ok(())
}
