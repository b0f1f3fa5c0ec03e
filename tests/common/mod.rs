//! Fake stages shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use buscobatch::core::{Ledger, LedgerPaths, Pipeline, Stage, StageContext};
use buscobatch::domain::{Metrics, StageName, WorkItem};

/// What a fake stage does for one item
#[derive(Debug, Clone)]
pub enum Action {
    Pass,
    Fail(&'static str),
    Sleep(Duration),
    Panic,
}

pub type Script = Arc<dyn Fn(StageName, &str) -> Action + Send + Sync>;

/// A stage that follows a script and counts its invocations
pub struct FakeStage {
    name: StageName,
    required: Vec<&'static str>,
    script: Script,
    calls: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    work_dirs: Mutex<Vec<PathBuf>>,
}

impl FakeStage {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn work_dirs(&self) -> Vec<PathBuf> {
        self.work_dirs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Stage for FakeStage {
    fn name(&self) -> StageName {
        self.name
    }

    fn required_locators(&self) -> &[&'static str] {
        &self.required
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.work_dirs.lock().unwrap().push(ctx.work_dir().to_path_buf());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = self.act(ctx).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl FakeStage {
    async fn act(&self, ctx: &mut StageContext) -> Result<()> {
        // Leave something behind to prove scratch cleanup
        std::fs::write(ctx.work_dir().join(format!("{}.out", self.name)), b"x")?;

        match (self.script)(self.name, &ctx.item().id) {
            Action::Pass => {}
            Action::Fail(message) => anyhow::bail!(message),
            Action::Sleep(delay) => tokio::time::sleep(delay).await,
            Action::Panic => panic!("{} exploded", self.name),
        }

        if self.name == StageName::ParseResult {
            ctx.set_metrics(metrics_for(&ctx.item().id));
        }
        Ok(())
    }
}

/// The seven standard stages, all driven by `script`
pub struct FakePipeline {
    pub stages: Vec<Arc<FakeStage>>,
    pub peak: Arc<AtomicUsize>,
}

impl FakePipeline {
    pub fn new(script: impl Fn(StageName, &str) -> Action + Send + Sync + 'static) -> Self {
        Self::with_required(script, &[])
    }

    /// Like `new`, with the download stage requiring `required` locators
    pub fn with_required(
        script: impl Fn(StageName, &str) -> Action + Send + Sync + 'static,
        required: &[&'static str],
    ) -> Self {
        let script: Script = Arc::new(script);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let stages = StageName::ALL
            .iter()
            .map(|&name| {
                Arc::new(FakeStage {
                    name,
                    required: if name == StageName::Download {
                        required.to_vec()
                    } else {
                        Vec::new()
                    },
                    script: Arc::clone(&script),
                    calls: AtomicUsize::new(0),
                    in_flight: Arc::clone(&in_flight),
                    peak: Arc::clone(&peak),
                    work_dirs: Mutex::new(Vec::new()),
                })
            })
            .collect();

        Self { stages, peak }
    }

    pub fn pipeline(&self) -> Pipeline {
        self.stages.iter().fold(Pipeline::new(), |p, s| {
            p.shared_stage(Arc::clone(s) as Arc<dyn Stage>)
        })
    }

    pub fn stage(&self, name: StageName) -> &FakeStage {
        self.stages
            .iter()
            .find(|s| s.name == name)
            .expect("every stage is present")
    }

    pub fn calls(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.calls()).collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls().iter().sum()
    }

    /// Peak number of stages running at once, across all items
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub fn pass_all(_: StageName, _: &str) -> Action {
    Action::Pass
}

/// Deterministic metrics so rows can be checked per id
pub fn metrics_for(id: &str) -> Metrics {
    let n = id.bytes().map(u32::from).sum::<u32>() % 100;
    Metrics {
        reference_lineage: "eukaryota_odb12".to_string(),
        group_count: 129,
        complete_pct: f64::from(n),
        single_pct: f64::from(n),
        duplicated_pct: 0.0,
        fragmented_pct: 0.0,
        missing_pct: f64::from(100 - n),
    }
}

pub fn item(id: &str) -> WorkItem {
    WorkItem::new(
        id,
        [
            ("annotation_url", format!("https://example.org/{}.gff.gz", id)),
            ("assembly_url", format!("https://example.org/{}.fna.gz", id)),
        ],
    )
}

pub fn items(ids: &[&str]) -> Vec<WorkItem> {
    ids.iter().map(|id| item(id)).collect()
}

pub fn ledger_paths(dir: &Path) -> LedgerPaths {
    LedgerPaths::new(dir.join("busco_results.tsv"), dir.join("busco_failures.tsv"))
}

pub fn open_ledger(dir: &Path) -> Ledger {
    Ledger::open(ledger_paths(dir)).unwrap()
}

/// Data rows of a store (header excluded)
pub fn data_rows(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
