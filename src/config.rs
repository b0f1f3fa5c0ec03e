//! Configuration for buscobatch.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (applied by the CLI on top of the resolved config)
//! 2. Environment variables (BUSCOBATCH_CONCURRENCY, BUSCOBATCH_STAGE_TIMEOUT,
//!    BUSCOBATCH_SCRATCH_DIR, BUSCOBATCH_LINEAGE)
//! 3. Config file (.buscobatch/config.yaml)
//! 4. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .buscobatch/config.yaml
//! - Paths in config file are relative to the project root (the parent of
//!   .buscobatch/)

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::http::DEFAULT_DOWNLOAD_TIMEOUT;
use crate::core::stage::{StageTimeouts, DEFAULT_STAGE_TIMEOUT};
use crate::domain::StageName;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const ENV_CONCURRENCY: &str = "BUSCOBATCH_CONCURRENCY";
pub const ENV_STAGE_TIMEOUT: &str = "BUSCOBATCH_STAGE_TIMEOUT";
pub const ENV_SCRATCH_DIR: &str = "BUSCOBATCH_SCRATCH_DIR";
pub const ENV_LINEAGE: &str = "BUSCOBATCH_LINEAGE";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub busco: Option<BuscoConfig>,
    #[serde(default)]
    pub download: Option<DownloadConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    pub concurrency: Option<usize>,
    pub stage_timeout_seconds: Option<u64>,
    /// Per-stage overrides keyed by stage name (e.g. `analyze: 14400`)
    #[serde(default)]
    pub stage_timeouts: HashMap<StageName, u64>,
    /// Scratch root (relative to the project root)
    pub scratch_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    pub annocli: Option<String>,
    pub keep_longest_isoform: Option<String>,
    pub extract_sequences: Option<String>,
    pub busco: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuscoConfig {
    pub lineage: Option<String>,
    /// Directory holding lineage datasets (relative to the project root)
    pub lineage_dir: Option<String>,
    pub offline: Option<bool>,
    pub cpu: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    pub timeout_seconds: Option<u64>,
}

/// Fully resolved configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub run: RunSettings,
    pub tools: ToolSettings,
    pub busco: BuscoSettings,
    pub download_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSettings {
    pub concurrency: usize,
    pub stage_timeout_seconds: u64,
    pub stage_timeouts: BTreeMap<StageName, u64>,
    pub scratch_dir: PathBuf,
}

/// Executables invoked by the tool stages
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSettings {
    pub annocli: String,
    pub keep_longest_isoform: String,
    pub extract_sequences: String,
    pub busco: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            annocli: "annocli".to_string(),
            keep_longest_isoform: "agat_sp_keep_longest_isoform.pl".to_string(),
            extract_sequences: "agat_sp_extract_sequences.pl".to_string(),
            busco: "busco".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuscoSettings {
    pub lineage: String,
    pub lineage_dir: Option<PathBuf>,
    pub offline: bool,
    pub cpu: u32,
}

impl Default for BuscoSettings {
    fn default() -> Self {
        Self {
            lineage: "eukaryota_odb12".to_string(),
            lineage_dir: None,
            offline: true,
            cpu: 1,
        }
    }
}

impl ResolvedConfig {
    /// Stage time budgets with per-stage overrides applied
    pub fn stage_timeouts(&self) -> StageTimeouts {
        self.run.stage_timeouts.iter().fold(
            StageTimeouts::new(Duration::from_secs(self.run.stage_timeout_seconds)),
            |timeouts, (stage, secs)| timeouts.with_override(*stage, Duration::from_secs(*secs)),
        )
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_seconds)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".buscobatch").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn env_parse<T>(env: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {}='{}': {}", name, raw, e)),
        _ => Ok(None),
    }
}

/// Merge a parsed config file and the environment over the defaults
pub fn resolve(
    config_path: Option<&Path>,
    file: Option<ConfigFile>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    // Project root is the parent of .buscobatch/ (i.e., grandparent of config.yaml)
    let base_dir = config_path
        .and_then(Path::parent)
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));

    let (run, tools, busco, download) = match file {
        Some(f) => (f.run, f.tools, f.busco, f.download),
        None => (RunConfig::default(), ToolsConfig::default(), None, None),
    };

    let concurrency = match env_parse::<usize>(&env, ENV_CONCURRENCY)? {
        Some(n) => n,
        None => run.concurrency.unwrap_or(1),
    };
    if concurrency == 0 {
        anyhow::bail!("Concurrency must be at least 1");
    }

    let stage_timeout_seconds = match env_parse::<u64>(&env, ENV_STAGE_TIMEOUT)? {
        Some(secs) => secs,
        None => run
            .stage_timeout_seconds
            .unwrap_or(DEFAULT_STAGE_TIMEOUT.as_secs()),
    };

    let scratch_dir = if let Some(dir) = env(ENV_SCRATCH_DIR).filter(|d| !d.trim().is_empty()) {
        PathBuf::from(dir)
    } else if let Some(ref dir) = run.scratch_dir {
        resolve_path(base_dir, dir)
    } else {
        std::env::temp_dir()
    };

    let defaults = ToolSettings::default();
    let tools = ToolSettings {
        annocli: tools.annocli.unwrap_or(defaults.annocli),
        keep_longest_isoform: tools
            .keep_longest_isoform
            .unwrap_or(defaults.keep_longest_isoform),
        extract_sequences: tools.extract_sequences.unwrap_or(defaults.extract_sequences),
        busco: tools.busco.unwrap_or(defaults.busco),
    };

    let defaults = BuscoSettings::default();
    let busco = BuscoSettings {
        lineage: env(ENV_LINEAGE)
            .filter(|l| !l.trim().is_empty())
            .or_else(|| busco.as_ref().and_then(|b| b.lineage.clone()))
            .unwrap_or(defaults.lineage),
        lineage_dir: busco
            .as_ref()
            .and_then(|b| b.lineage_dir.as_deref())
            .map(|dir| resolve_path(base_dir, dir)),
        offline: busco
            .as_ref()
            .and_then(|b| b.offline)
            .unwrap_or(defaults.offline),
        cpu: busco.as_ref().and_then(|b| b.cpu).unwrap_or(defaults.cpu).max(1),
    };

    Ok(ResolvedConfig {
        config_file: config_path.map(Path::to_path_buf),
        run: RunSettings {
            concurrency,
            stage_timeout_seconds,
            stage_timeouts: run.stage_timeouts.into_iter().collect(),
            scratch_dir,
        },
        tools,
        busco,
        download_timeout_seconds: download
            .and_then(|d| d.timeout_seconds)
            .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT.as_secs()),
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let config_file = find_config_file();
    let parsed = config_file.as_deref().map(load_config_file).transpose()?;

    resolve(config_file.as_deref(), parsed, |name| std::env::var(name).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
