//! Idempotency Integration Tests
//!
//! Tests that repeated and concurrent batch runs record exactly one outcome
//! per item and never re-dispatch anything already in the ledger.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use buscobatch::core::{Chunk, DispatchOptions, Orchestrator, PipelineRunner, StageTimeouts};
use buscobatch::domain::StageName;
use common::{data_rows, items, ledger_paths, metrics_for, open_ledger, pass_all, Action, FakePipeline};
use tempfile::TempDir;

fn orchestrator(fake: &FakePipeline, scratch: &TempDir, options: DispatchOptions) -> Orchestrator {
    let runner = PipelineRunner::new(fake.pipeline(), StageTimeouts::default())
        .unwrap()
        .with_scratch_root(scratch.path());
    Orchestrator::new(runner, options)
}

fn b_fails_at_second_stage(stage: StageName, id: &str) -> Action {
    if id == "B" && stage == StageName::Decompress {
        Action::Fail("bad format")
    } else {
        Action::Pass
    }
}

#[tokio::test]
async fn test_mixed_batch_then_rerun_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let paths = ledger_paths(dir.path());

    // First run: A and C succeed, B fails at its second stage
    {
        let fake = FakePipeline::new(b_fails_at_second_stage);
        let ledger = open_ledger(dir.path());
        let summary = orchestrator(&fake, &scratch, DispatchOptions::default())
            .process(items(&["A", "B", "C"]), &ledger)
            .await
            .unwrap();

        assert_eq!(summary.dispatched, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        // B stopped after decompress
        assert_eq!(fake.stage(StageName::Decompress).calls(), 3);
        assert_eq!(fake.stage(StageName::Normalize).calls(), 2);
    }

    let successes = open_ledger(dir.path()).successes().unwrap();
    let ids: Vec<&str> = successes.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "C"]);
    assert_eq!(successes[0].metrics, metrics_for("A"));
    assert_eq!(data_rows(&paths.failure), vec!["B\tdecompress\tbad format"]);

    let success_bytes = std::fs::read(&paths.success).unwrap();
    let failure_bytes = std::fs::read(&paths.failure).unwrap();

    // Second run: nothing is dispatched and nothing is written
    let fake = FakePipeline::new(pass_all);
    let ledger = open_ledger(dir.path());
    let summary = orchestrator(&fake, &scratch, DispatchOptions::default())
        .process(items(&["A", "B", "C"]), &ledger)
        .await
        .unwrap();

    assert_eq!(summary.already_recorded, 3);
    assert_eq!(summary.dispatched, 0);
    assert_eq!(fake.total_calls(), 0);
    assert_eq!(std::fs::read(&paths.success).unwrap(), success_bytes);
    assert_eq!(std::fs::read(&paths.failure).unwrap(), failure_bytes);
}

#[tokio::test]
async fn test_failed_items_are_not_retried() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();

    let fake = FakePipeline::new(b_fails_at_second_stage);
    orchestrator(&fake, &scratch, DispatchOptions::default())
        .process(items(&["A", "B"]), &open_ledger(dir.path()))
        .await
        .unwrap();

    // B would pass now, but its failure row keeps it out of the batch
    let fake = FakePipeline::new(pass_all);
    let summary = orchestrator(&fake, &scratch, DispatchOptions::default())
        .process(items(&["A", "B", "D"]), &open_ledger(dir.path()))
        .await
        .unwrap();

    assert_eq!(summary.dispatched, 1);
    assert_eq!(fake.stage(StageName::Download).calls(), 1);
    let failed: Vec<String> = open_ledger(dir.path())
        .failures()
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(failed, vec!["B"]);
}

#[tokio::test]
async fn test_concurrent_items_record_each_exactly_once() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let ids: Vec<String> = (0..24).map(|i| format!("GCF_{:03}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

    // Staggered delays so items finish out of manifest order; every fifth fails
    let fake = FakePipeline::new(|stage, id| {
        let n: u64 = id[4..].parse().unwrap();
        match stage {
            StageName::Download => Action::Sleep(Duration::from_millis((n % 4) * 15)),
            StageName::Analyze if n % 5 == 0 => Action::Fail("busco failed"),
            _ => Action::Pass,
        }
    });
    let options = DispatchOptions {
        concurrency: 4,
        ..Default::default()
    };
    let ledger = open_ledger(dir.path());
    let summary = orchestrator(&fake, &scratch, options)
        .process(items(&id_refs), &ledger)
        .await
        .unwrap();

    assert_eq!(summary.succeeded + summary.failed, 24);
    assert_eq!(summary.failed, 5);
    assert_eq!(summary.ledger_conflicts, 0);
    assert!(fake.peak_in_flight() <= 4);
    assert!(fake.peak_in_flight() > 1);

    let paths = ledger_paths(dir.path());
    let rows: Vec<String> = data_rows(&paths.success)
        .into_iter()
        .chain(data_rows(&paths.failure))
        .collect();
    assert_eq!(rows.len(), 24);

    let recorded: HashSet<&str> = rows.iter().map(|r| r.split('\t').next().unwrap()).collect();
    assert_eq!(recorded, id_refs.iter().copied().collect::<HashSet<_>>());

    // Every success row parses back
    assert_eq!(ledger.successes().unwrap().len(), 19);
}

#[tokio::test]
async fn test_duplicate_manifest_ids_dispatch_once() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let fake = FakePipeline::new(pass_all);

    let summary = orchestrator(&fake, &scratch, DispatchOptions::default())
        .process(items(&["A", "B", "A", "A"]), &open_ledger(dir.path()))
        .await
        .unwrap();

    assert_eq!(summary.total, 4);
    assert_eq!(summary.duplicates_in_manifest, 2);
    assert_eq!(summary.dispatched, 2);
    assert_eq!(fake.stage(StageName::Download).calls(), 2);
    assert_eq!(data_rows(&ledger_paths(dir.path()).success).len(), 2);
}

#[tokio::test]
async fn test_chunks_and_limit_cover_the_manifest() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let manifest = ["a", "b", "c", "d", "e"];

    let fake = FakePipeline::new(pass_all);
    let first = orchestrator(
        &fake,
        &scratch,
        DispatchOptions {
            chunk: Some(Chunk::new(0, 2).unwrap()),
            limit: Some(2),
            ..Default::default()
        },
    )
    .process(items(&manifest), &open_ledger(dir.path()))
    .await
    .unwrap();
    assert_eq!(first.dispatched, 2);
    assert_eq!(first.deferred, 3);

    let fake = FakePipeline::new(pass_all);
    let second = orchestrator(
        &fake,
        &scratch,
        DispatchOptions {
            chunk: Some(Chunk::new(1, 2).unwrap()),
            ..Default::default()
        },
    )
    .process(items(&manifest), &open_ledger(dir.path()))
    .await
    .unwrap();
    // b, d and e remain; chunk 1/2 of those is d
    assert_eq!(second.already_recorded, 2);
    assert_eq!(second.dispatched, 1);

    let fake = FakePipeline::new(pass_all);
    let last = orchestrator(&fake, &scratch, DispatchOptions::default())
        .process(items(&manifest), &open_ledger(dir.path()))
        .await
        .unwrap();
    assert_eq!(last.dispatched, 2);
    assert_eq!(data_rows(&ledger_paths(dir.path()).success).len(), 5);
}

fn slow_download(stage: StageName, _: &str) -> Action {
    if stage == StageName::Download {
        Action::Sleep(Duration::from_millis(50))
    } else {
        Action::Pass
    }
}

#[tokio::test]
async fn test_outcome_recorded_elsewhere_mid_run_is_a_conflict() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let paths = ledger_paths(dir.path());

    let fake = FakePipeline::new(|stage, id| {
        if id == "A" && stage == StageName::Download {
            Action::Sleep(Duration::from_millis(100))
        } else {
            Action::Pass
        }
    });
    let options = DispatchOptions {
        concurrency: 3,
        ..Default::default()
    };
    let orchestrator = orchestrator(&fake, &scratch, options);
    let ledger = open_ledger(dir.path());
    let other = open_ledger(dir.path());

    // Another job records A while this run is still working on it
    let (summary, ()) = tokio::join!(
        orchestrator.process(items(&["A", "B", "C"]), &ledger),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            other
                .record_failure("A", StageName::Analyze, "recorded by another job")
                .unwrap();
        }
    );
    let summary = summary.unwrap();

    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.ledger_conflicts, 1);

    let mut successes: Vec<String> = data_rows(&paths.success)
        .iter()
        .map(|r| r.split('\t').next().unwrap().to_string())
        .collect();
    successes.sort();
    assert_eq!(successes, vec!["B", "C"]);
    assert_eq!(
        data_rows(&paths.failure),
        vec!["A\tanalyze\trecorded by another job"]
    );
}

#[tokio::test]
async fn test_overlapping_runs_on_shared_stores_record_once() {
    let dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let paths = ledger_paths(dir.path());

    let fake_a = FakePipeline::new(slow_download);
    let fake_b = FakePipeline::new(slow_download);
    let run_a = orchestrator(&fake_a, &scratch, DispatchOptions::default());
    let run_b = orchestrator(&fake_b, &scratch, DispatchOptions::default());
    let ledger_a = open_ledger(dir.path());
    let ledger_b = open_ledger(dir.path());

    let (a, b) = tokio::join!(
        run_a.process(items(&["A", "B", "C"]), &ledger_a),
        run_b.process(items(&["A", "B", "C"]), &ledger_b),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    // Both runs planned before either recorded anything
    assert_eq!(a.dispatched + b.dispatched, 6);
    assert_eq!(a.succeeded + b.succeeded, 3);
    assert_eq!(a.ledger_conflicts + b.ledger_conflicts, 3);

    let ids: Vec<String> = data_rows(&paths.success)
        .iter()
        .map(|r| r.split('\t').next().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 3);
    assert!(data_rows(&paths.failure).is_empty());
}
