// Full batches against real `sh` tools.
#![cfg(unix)]

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use tokio::sync::mpsc;

use common::{bounded, init_tracing, write_script};
use triagerun::batch::{plan_batch, SchedulerLimits, Selection};
use triagerun::catalog::ToolCatalog;
use triagerun::cli::CliArgs;
use triagerun::engine::{CancelPolicy, CoreRuntime, Runtime, RuntimeEvent};
use triagerun::exec::{RealExecutorBackend, RunnerSettings, LOG_FILE};
use triagerun::output::ResultOrganizer;
use triagerun::provision::BinaryProvisioner;
use triagerun::report::REPORT_FILE;
use triagerun::types::{BatchOutcome, TaskStatus};
use triagerun_test_utils::builders::ToolBuilder;
use triagerun_test_utils::fake_source::FakeReleaseSource;

#[tokio::test]
async fn three_artifact_tools_fill_three_directories() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let tools_dir = dir.path().join("tools");
    let triage = dir.path().join("C");
    std::fs::create_dir_all(&triage).unwrap();
    write_script(&tools_dir, "parse.sh", "echo \"parsed $2\" > \"$1/$2.csv\"");

    let raw = ["PECmd", "LECmd", "JLECmd"]
        .iter()
        .map(|name| {
            ToolBuilder::new(name)
                .operator_binary("parse.sh", None)
                .command(&["{exe}", "{output}", name])
                .raw()
        })
        .collect();
    let catalog = ToolCatalog::from_raw(raw, &BTreeMap::new()).unwrap();

    let selection = Selection {
        tools: vec!["PECmd".into(), "LECmd".into(), "JLECmd".into()],
        triage_root: Some(triage),
        ..Selection::default()
    };
    let mut organizer = ResultOrganizer::new(dir.path().join("Output"));
    let plan = plan_batch(&catalog, &selection, &mut organizer, Local::now()).unwrap();

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let provisioner = BinaryProvisioner::new(
        tools_dir,
        dir.path().join("cache"),
        Arc::new(FakeReleaseSource::new()),
    );
    let executor = RealExecutorBackend::new(rt_tx, provisioner, RunnerSettings::default());
    let core = CoreRuntime::new(plan, SchedulerLimits::default(), CancelPolicy::default());
    let report = bounded(Runtime::new(core, rt_rx, executor).run()).await.unwrap();

    assert_eq!(report.outcome, BatchOutcome::Succeeded);
    for name in ["PECmd", "LECmd", "JLECmd"] {
        let record = report.task(name).unwrap();
        assert_eq!(record.status, TaskStatus::Succeeded);
        let out = dir.path().join("Output").join("artifact-collection").join(name);
        assert_eq!(record.output_dir, out);
        assert!(out.join(format!("{name}.csv")).is_file());
        assert!(out.join(LOG_FILE).is_file());
    }
}

#[tokio::test]
async fn run_entry_point_writes_the_report() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let tools_dir = dir.path().join("tools");
    let triage = dir.path().join("C");
    std::fs::create_dir_all(&triage).unwrap();
    write_script(&tools_dir, "good.sh", "echo ok > \"$1/out.txt\"");
    write_script(&tools_dir, "bad.sh", "exit 1");

    let config = dir.path().join("Triagerun.toml");
    std::fs::write(
        &config,
        format!(
            r#"
[engine]
max_running = 2

[paths]
tools_dir = "{tools}"
cache_dir = "{cache}"
output_dir = "{output}"

[run]
tools = ["Good", "Bad"]
triage_root = "{triage}"

[[tool]]
name = "Good"
category = "artifact-collection"
inputs = ["triage-root"]
binary = {{ source = "operator", path = "good.sh" }}
[[tool.command]]
args = ["{{exe}}", "{{output}}"]

[[tool]]
name = "Bad"
category = "artifact-collection"
inputs = ["triage-root"]
binary = {{ source = "operator", path = "bad.sh" }}
[[tool.command]]
args = ["{{exe}}", "{{output}}"]
"#,
            tools = tools_dir.display(),
            cache = dir.path().join("cache").display(),
            output = dir.path().join("Output").display(),
            triage = triage.display(),
        ),
    )
    .unwrap();

    let args = CliArgs::try_parse_from(["triagerun", "--config", config.to_str().unwrap()]).unwrap();
    let report = bounded(triagerun::run(args)).await.unwrap().unwrap();

    assert_eq!(report.outcome, BatchOutcome::PartialFailure);
    let json = std::fs::read_to_string(dir.path().join("Output").join(REPORT_FILE)).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["outcome"], "partial_failure");
    assert_eq!(value["tasks"][1]["failure"]["error"]["detail"], 1);
}

#[tokio::test]
async fn dry_run_executes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let triage = dir.path().join("C");
    std::fs::create_dir_all(&triage).unwrap();

    let args = CliArgs::try_parse_from([
        "triagerun",
        "--dry-run",
        "--tool",
        "PECmd",
        "--triage-root",
        triage.to_str().unwrap(),
        "--output",
        dir.path().join("Output").to_str().unwrap(),
    ])
    .unwrap();

    assert!(triagerun::run(args).await.unwrap().is_none());
    assert!(!dir.path().join("Output").join(REPORT_FILE).exists());
}
