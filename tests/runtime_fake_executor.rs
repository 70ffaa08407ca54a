// tests/runtime_fake_executor.rs

mod common;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use common::{bounded, init_tracing, wait_until};
use triagerun::batch::{BatchPlan, SchedulerLimits};
use triagerun::engine::{CancelPolicy, CoreRuntime, Runtime, RuntimeEvent, StatusEvent};
use triagerun::errors::{ProvisionError, RunError, SkipReason, TaskFailure};
use triagerun::report::BatchReport;
use triagerun::types::{BatchOutcome, CancelMode, InputKind, TaskStatus};
use triagerun_test_utils::builders::{plan_of, TaskBuilder, ToolBuilder};
use triagerun_test_utils::fake_executor::{Call, FakeExecutor};

type TestResult = Result<(), Box<dyn Error>>;

fn statuses_of(events: &[StatusEvent], task: &str) -> Vec<TaskStatus> {
    events
        .iter()
        .filter(|e| e.task == task)
        .map(|e| e.status)
        .collect()
}

async fn run_plan(
    plan: BatchPlan,
    limits: SchedulerLimits,
    build: impl FnOnce(FakeExecutor) -> FakeExecutor,
) -> Result<(BatchReport, Vec<StatusEvent>, Vec<Call>), Box<dyn Error>> {
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();

    let executor = build(FakeExecutor::new(rt_tx.clone()));
    let handle = executor.handle();

    let core = CoreRuntime::new(plan, limits, CancelPolicy::default());
    let runtime = Runtime::new(core, rt_rx, executor).with_status_events(status_tx);
    let report = bounded(runtime.run()).await?;

    let mut events = Vec::new();
    while let Ok(event) = status_rx.try_recv() {
        events.push(event);
    }
    Ok((report, events, handle.calls()))
}

#[tokio::test]
async fn three_successful_tasks_succeed() -> TestResult {
    init_tracing();

    let (report, events, calls) =
        run_plan(plan_of(&["A", "B", "C"]), SchedulerLimits::default(), |e| e).await?;

    assert_eq!(report.outcome, BatchOutcome::Succeeded);
    assert_eq!(report.count(TaskStatus::Succeeded), 3);
    assert!(!report.cancelled);

    for task in ["A", "B", "C"] {
        assert_eq!(
            statuses_of(&events, task),
            vec![TaskStatus::Provisioning, TaskStatus::Running, TaskStatus::Succeeded]
        );
        let provision = calls.iter().position(|c| c == &Call::Provision(task.into()));
        let run = calls.iter().position(|c| c == &Call::Run(task.into()));
        assert!(provision < run, "{task} ran before it was provisioned");
    }
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    Ok(())
}

#[tokio::test]
async fn one_failing_task_is_partial_failure() -> TestResult {
    init_tracing();

    let (report, _, _) = run_plan(plan_of(&["A", "B"]), SchedulerLimits::default(), |e| {
        e.fail_run("B", RunError::ProcessExit(1))
    })
    .await?;

    assert_eq!(report.outcome, BatchOutcome::PartialFailure);
    let a = report.task("A").ok_or("A missing")?;
    let b = report.task("B").ok_or("B missing")?;
    assert_eq!(a.status, TaskStatus::Succeeded);
    assert_eq!(b.status, TaskStatus::Failed);
    assert_eq!(b.failure, Some(TaskFailure::Run(RunError::ProcessExit(1))));
    Ok(())
}

#[tokio::test]
async fn every_attempted_task_failing_is_total_failure() -> TestResult {
    let (report, _, calls) = run_plan(plan_of(&["A", "B"]), SchedulerLimits::default(), |e| {
        e.fail_provision("A", ProvisionError::Unavailable("no binary".into()))
            .fail_run("B", RunError::Launch("exec format error".into()))
    })
    .await?;

    assert_eq!(report.outcome, BatchOutcome::TotalFailure);
    let a = report.task("A").ok_or("A missing")?;
    assert_eq!(
        a.failure,
        Some(TaskFailure::Provision(ProvisionError::Unavailable("no binary".into())))
    );
    let b = report.task("B").ok_or("B missing")?;
    assert_eq!(b.status, TaskStatus::Failed);
    assert!(matches!(b.failure, Some(TaskFailure::Run(RunError::Launch(_)))));

    // A provisioning failure never reaches the run phase.
    assert!(!calls.contains(&Call::Run("A".into())));
    Ok(())
}

#[tokio::test]
async fn memory_task_without_image_is_skipped() -> TestResult {
    let artifact = TaskBuilder::new(ToolBuilder::new("PECmd").build()).planned();
    let memory = TaskBuilder::new(
        ToolBuilder::memory("Volatility3")
            .command(&["{exe}", "-f", "{memory}", "{module}"])
            .modules(&["pslist"])
            .build(),
    )
    .memory_image(None)
    .planned();
    let plan = BatchPlan {
        tasks: vec![artifact, memory],
        output_root: PathBuf::from("/out"),
        started_at: Utc::now(),
    };

    let (report, events, calls) = run_plan(plan, SchedulerLimits::default(), |e| e).await?;

    assert_eq!(report.outcome, BatchOutcome::Succeeded);
    let vol = report.task("Volatility3").ok_or("Volatility3 missing")?;
    assert_eq!(vol.status, TaskStatus::Skipped);
    assert_eq!(vol.skip_reason, Some(SkipReason::MissingInput(InputKind::MemoryImage)));
    assert_eq!(statuses_of(&events, "Volatility3"), vec![TaskStatus::Skipped]);
    assert!(!calls.contains(&Call::Provision("Volatility3".into())));
    Ok(())
}

#[tokio::test]
async fn batch_of_only_skipped_tasks_finishes_immediately() -> TestResult {
    let memory = TaskBuilder::new(ToolBuilder::memory("Vol").build()).planned();
    let plan = BatchPlan {
        tasks: vec![memory],
        output_root: PathBuf::from("/out"),
        started_at: Utc::now(),
    };

    let (report, _, calls) = run_plan(plan, SchedulerLimits::default(), |e| e).await?;
    assert_eq!(report.outcome, BatchOutcome::Succeeded);
    assert!(calls.is_empty());
    Ok(())
}

#[tokio::test]
async fn ceiling_of_one_runs_sequentially() -> TestResult {
    let limits = SchedulerLimits {
        max_running: 1,
        max_provisioning: 1,
    };
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executor = FakeExecutor::new(rt_tx.clone()).hold_runs();
    let handle = executor.handle();

    let core = CoreRuntime::new(plan_of(&["A", "B", "C", "D"]), limits, CancelPolicy::default());
    let runtime = tokio::spawn(Runtime::new(core, rt_rx, executor).run());

    for _ in 0..4 {
        wait_until(|| handle.held().len() == 1).await;
        handle.release_all().await;
    }

    let report = bounded(runtime).await??;
    assert_eq!(report.outcome, BatchOutcome::Succeeded);
    assert_eq!(handle.max_running_seen(), 1);
    assert_eq!(handle.runs(), vec!["A", "B", "C", "D"]);
    Ok(())
}

async fn cancel_with_two_running(mode: CancelMode) -> Result<(BatchReport, Vec<Call>), Box<dyn Error>> {
    init_tracing();

    let limits = SchedulerLimits {
        max_running: 2,
        max_provisioning: 1,
    };
    let policy = CancelPolicy {
        mode,
        grace_period: Duration::from_millis(50),
    };
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executor = FakeExecutor::new(rt_tx.clone()).hold_runs();
    let handle = executor.handle();

    let core = CoreRuntime::new(plan_of(&["A", "B", "C", "D", "E"]), limits, policy);
    let runtime = tokio::spawn(Runtime::new(core, rt_rx, executor).run());

    wait_until(|| handle.held().len() == 2).await;
    rt_tx.send(RuntimeEvent::CancelRequested).await?;

    if mode == CancelMode::Drain {
        // Give the runtime a moment to apply the cancel before the runs end.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.release_all().await;
    }

    let report = bounded(runtime).await??;
    Ok((report, handle.calls()))
}

#[tokio::test]
async fn cancel_lets_running_tasks_finish_and_skips_the_rest() -> TestResult {
    let (report, calls) = cancel_with_two_running(CancelMode::Drain).await?;

    assert!(report.cancelled);
    for task in ["A", "B"] {
        assert_eq!(report.task(task).map(|t| t.status), Some(TaskStatus::Succeeded));
    }
    for task in ["C", "D", "E"] {
        let record = report.task(task).ok_or("missing task")?;
        assert_eq!(record.status, TaskStatus::Skipped);
        assert_eq!(record.skip_reason, Some(SkipReason::Cancelled));
    }
    assert_eq!(report.outcome, BatchOutcome::Succeeded);
    assert!(!calls.iter().any(|c| matches!(c, Call::Terminate(_))));
    assert_eq!(calls.iter().filter(|c| matches!(c, Call::Run(_))).count(), 2);
    Ok(())
}

#[tokio::test]
async fn cancel_in_terminate_mode_stops_running_tasks() -> TestResult {
    let (report, calls) = cancel_with_two_running(CancelMode::Terminate).await?;

    assert!(report.cancelled);
    assert!(calls.contains(&Call::Terminate(Duration::from_millis(50))));
    for task in ["A", "B"] {
        let record = report.task(task).ok_or("missing task")?;
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.failure, Some(TaskFailure::Run(RunError::ProcessExit(-1))));
    }
    assert_eq!(report.count(TaskStatus::Skipped), 3);
    assert_eq!(report.outcome, BatchOutcome::TotalFailure);
    Ok(())
}

#[tokio::test]
async fn report_lists_tasks_in_plan_order() -> TestResult {
    let (report, _, _) = run_plan(plan_of(&["C", "A", "B"]), SchedulerLimits::default(), |e| e).await?;
    let names: Vec<&str> = report.tasks.iter().map(|t| t.tool.as_str()).collect();
    assert_eq!(names, vec!["C", "A", "B"]);
    assert_eq!(report.output_root, Path::new("/out"));
    Ok(())
}
