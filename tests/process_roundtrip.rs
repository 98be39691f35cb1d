//! Coordinator-to-worker roundtrip over real child processes.

#![cfg(any(target_os = "linux", target_os = "macos"))]

use std::fs::File;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::tempdir;

use gauntlet::config::EngineConfig;
use gauntlet::coordinator::Coordinator;
use gauntlet::group::MutationUnit;
use gauntlet::mutant::{DetectionStatus, MutantDescriptor, MutantResult};
use gauntlet::process::{ProcessWorkerFactory, WorkerCommand};

/// Test harness stand-in: passes for even mutant ids, fails for odd
/// ones, hangs when the covering test id says so.
fn fake_harness_path(tmp: &Path) -> PathBuf {
    let script = tmp.join("fake-harness");
    let mut file = File::create(&script).expect("fake harness should be created");
    file.write_all(
        br#"#!/usr/bin/env sh
if [ "$GAUNTLET_TEST" = "hang" ]; then
  sleep 30
fi
exit $((GAUNTLET_MUTANT_ID % 2))
"#,
    )
    .expect("fake harness should be written");
    file.sync_all().expect("fake harness should be flushed");
    std::fs::set_permissions(&script, PermissionsExt::from_mode(0o755))
        .expect("fake harness should be executable");
    script
}

fn mutant(id: u64, test: &str) -> MutantDescriptor {
    MutantDescriptor {
        id,
        class_id: "com.example.Account".to_string(),
        method_id: "withdraw".to_string(),
        line: id as u32,
        mutator: "negate_conditionals".to_string(),
        covering_tests: vec![test.to_string()],
        covering_runtime_ms: 10,
    }
}

fn worker_factory(script: &Path, per_test_timeout_ms: u64) -> ProcessWorkerFactory {
    ProcessWorkerFactory::new(WorkerCommand::new(
        env!("CARGO_BIN_EXE_gauntlet"),
        vec![
            "worker".to_string(),
            "--test-cmd".to_string(),
            script.display().to_string(),
            "--per-test-timeout-ms".to_string(),
            per_test_timeout_ms.to_string(),
        ],
    ))
}

fn status_of(results: &[MutantResult], id: u64) -> DetectionStatus {
    results
        .iter()
        .find(|r| r.mutant.id == id)
        .unwrap_or_else(|| panic!("mutant {id} should have a result"))
        .status
}

#[test]
fn unit_resolves_through_a_real_worker_process() {
    let tmp = tempdir().expect("tempdir should be created");
    let script = fake_harness_path(tmp.path());
    let factory = worker_factory(&script, 10_000);
    let config = EngineConfig::default()
        .with_workers(1)
        .with_base_timeout_ms(30_000);

    let unit = MutationUnit::new(0, vec![mutant(1, "t1"), mutant(2, "t2"), mutant(3, "t3")]);
    let results = Coordinator::new(&config, &factory)
        .run(vec![unit])
        .expect("run should succeed");

    assert_eq!(results.len(), 3);
    assert_eq!(status_of(&results, 1), DetectionStatus::Killed);
    assert_eq!(status_of(&results, 2), DetectionStatus::Survived);
    assert_eq!(status_of(&results, 3), DetectionStatus::Killed);
}

#[test]
fn worker_is_reused_across_units_of_one_run() {
    let tmp = tempdir().expect("tempdir should be created");
    let script = fake_harness_path(tmp.path());
    let factory = worker_factory(&script, 10_000);
    let config = EngineConfig::default()
        .with_workers(1)
        .with_base_timeout_ms(30_000);

    let units = vec![
        MutationUnit::new(0, vec![mutant(1, "t1")]),
        MutationUnit::new(1, vec![mutant(2, "t2")]),
        MutationUnit::new(2, vec![mutant(4, "t3")]),
    ];
    let results = Coordinator::new(&config, &factory)
        .run(units)
        .expect("run should succeed");

    assert_eq!(results.len(), 3);
    assert_eq!(status_of(&results, 1), DetectionStatus::Killed);
    assert_eq!(status_of(&results, 2), DetectionStatus::Survived);
    assert_eq!(status_of(&results, 4), DetectionStatus::Survived);
}

#[test]
fn hung_covering_test_times_out_inside_the_worker() {
    let tmp = tempdir().expect("tempdir should be created");
    let script = fake_harness_path(tmp.path());
    // local per-test timeout well under the unit deadline
    let factory = worker_factory(&script, 300);
    let config = EngineConfig::default()
        .with_workers(1)
        .with_base_timeout_ms(30_000);

    let unit = MutationUnit::new(0, vec![mutant(2, "hang"), mutant(4, "t2")]);
    let results = Coordinator::new(&config, &factory)
        .run(vec![unit])
        .expect("run should succeed");

    // the worker resolves the hang locally and keeps serving the unit
    assert_eq!(status_of(&results, 2), DetectionStatus::TimedOut);
    assert_eq!(status_of(&results, 4), DetectionStatus::Survived);
}

#[test]
fn hung_worker_is_killed_at_the_unit_deadline() {
    let tmp = tempdir().expect("tempdir should be created");
    let script = fake_harness_path(tmp.path());
    // per-test timeout far beyond the unit deadline, so the coordinator
    // has to step in
    let factory = worker_factory(&script, 120_000);
    let config = EngineConfig::default()
        .with_workers(1)
        .with_base_timeout_ms(500)
        .with_timeout_factor(0.0)
        .with_retry_on_crash(false);

    let unit = MutationUnit::new(0, vec![mutant(2, "hang"), mutant(4, "t2")]);
    let results = Coordinator::new(&config, &factory)
        .run(vec![unit])
        .expect("run should succeed");

    assert_eq!(status_of(&results, 2), DetectionStatus::TimedOut);
    assert_eq!(status_of(&results, 4), DetectionStatus::RunError);
}
