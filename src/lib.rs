// src/lib.rs

pub mod batch;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod output;
pub mod provision;
pub mod report;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::batch::{plan_batch, BatchPlan, SchedulerLimits, Selection};
use crate::catalog::ToolCatalog;
use crate::cli::CliArgs;
use crate::config::{load_or_default, ConfigFile};
use crate::engine::{CancelPolicy, CoreRuntime, Runtime, RuntimeEvent, StatusEvent};
use crate::errors::TriageError;
use crate::exec::{RealExecutorBackend, RunnerSettings};
use crate::output::ResultOrganizer;
use crate::provision::{BinaryProvisioner, HttpReleaseSource};
use crate::report::BatchReport;
use crate::types::ToolCategory;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and CLI overrides
/// - catalog + batch planning
/// - provisioner, executor backend and runtime
/// - Ctrl-C handling and status output
///
/// Returns `None` when nothing was executed (`--list`, `--dry-run`).
pub async fn run(args: CliArgs) -> Result<Option<BatchReport>> {
    let mut cfg = load_or_default(args.config.as_deref()).context("loading configuration")?;
    apply_cli_overrides(&mut cfg, &args)?;

    let catalog = ToolCatalog::load(cfg.tool.clone(), &cfg.release)?;

    if args.list {
        print_catalog(&catalog);
        return Ok(None);
    }

    let selection = build_selection(&catalog, &cfg, &args)?;
    let mut organizer = ResultOrganizer::new(cfg.paths.output_dir.clone());
    let plan = plan_batch(&catalog, &selection, &mut organizer, Local::now())?;

    if args.dry_run {
        print_dry_run(&cfg, &plan);
        return Ok(None);
    }

    let output_root = plan.output_root.clone();
    let report = execute_plan(&cfg, plan).await?;

    let path = report
        .write_json(&output_root)
        .context("writing the batch report")?;
    print_summary(&report);
    println!("report: {}", path.display());

    Ok(Some(report))
}

/// Run a planned batch to completion with the production executor.
async fn execute_plan(cfg: &ConfigFile, plan: BatchPlan) -> Result<BatchReport> {
    let source = Arc::new(HttpReleaseSource::new()?);
    let provisioner = BinaryProvisioner::new(
        cfg.paths.tools_dir.clone(),
        cfg.paths.cache_dir.clone(),
        source,
    );

    let limits = SchedulerLimits {
        max_running: cfg.engine.max_running,
        max_provisioning: cfg.engine.max_provisioning,
    };
    let policy = CancelPolicy {
        mode: cfg.engine.cancel_mode,
        grace_period: cfg.engine.grace_period,
    };

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<StatusEvent>();

    let executor = RealExecutorBackend::new(
        rt_tx.clone(),
        provisioner,
        RunnerSettings {
            python: cfg.engine.python.clone(),
        },
    );

    // Ctrl-C → batch cancellation.
    let ctrl_c = {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            eprintln!("cancelling batch; no new tools will start");
            let _ = tx.send(RuntimeEvent::CancelRequested).await;
        })
    };
    drop(rt_tx);

    let printer = tokio::spawn(async move {
        while let Some(event) = status_rx.recv().await {
            print_status(&event);
        }
    });

    info!(
        tasks = plan.tasks.len(),
        output = %plan.output_root.display(),
        "starting batch"
    );
    let core = CoreRuntime::new(plan, limits, policy);
    let runtime = Runtime::new(core, rt_rx, executor).with_status_events(status_tx);
    let result = runtime.run().await;

    ctrl_c.abort();
    if let Err(e) = printer.await {
        debug!(error = %e, "status printer task failed");
    }

    Ok(result?)
}

/// Fold CLI flags over the file configuration.
pub fn apply_cli_overrides(cfg: &mut ConfigFile, args: &CliArgs) -> crate::errors::Result<()> {
    if let Some(n) = args.max_running {
        if n == 0 {
            return Err(TriageError::ConfigError("--max-running must be >= 1".into()));
        }
        cfg.engine.max_running = n;
    }
    if let Some(n) = args.max_provisioning {
        if n == 0 {
            return Err(TriageError::ConfigError(
                "--max-provisioning must be >= 1".into(),
            ));
        }
        cfg.engine.max_provisioning = n;
    }
    if let Some(mode) = args.cancel_mode {
        cfg.engine.cancel_mode = mode.into();
    }
    if let Some(dir) = &args.output {
        cfg.paths.output_dir = dir.clone();
    }
    if let Some(root) = &args.triage_root {
        cfg.run.triage_root = Some(root.clone());
    }
    if let Some(image) = &args.memory_image {
        cfg.run.memory_image = Some(image.clone());
    }
    Ok(())
}

/// Turn config + flags into a selection.
///
/// `--tool`/`--all` replace `[run].tools`. `--module` values replace the
/// module list of every selected tool that takes modules.
pub fn build_selection(
    catalog: &ToolCatalog,
    cfg: &ConfigFile,
    args: &CliArgs,
) -> crate::errors::Result<Selection> {
    let tools: Vec<String> = if args.all {
        catalog.all().iter().map(|t| t.name.clone()).collect()
    } else if !args.tools.is_empty() {
        args.tools.clone()
    } else {
        cfg.run.tools.clone()
    };

    let mut modules = cfg.run.modules.clone();
    if !args.modules.is_empty() {
        let mut applied = false;
        for name in &tools {
            let def = catalog.get(name)?;
            if def.accepts_modules() {
                modules.retain(|tool, _| !tool.eq_ignore_ascii_case(&def.name));
                modules.insert(def.name.clone(), args.modules.clone());
                applied = true;
            }
        }
        if !applied {
            return Err(TriageError::Selection(
                "--module given but no selected tool takes modules".into(),
            ));
        }
    }

    Ok(Selection {
        tools,
        modules,
        triage_root: cfg.run.triage_root.clone(),
        memory_image: cfg.run.memory_image.clone(),
    })
}

fn print_catalog(catalog: &ToolCatalog) {
    for category in ToolCategory::ALL {
        let tools = catalog.list(category);
        println!("{category} ({}):", tools.len());
        for tool in tools {
            println!("  {:<22} {}", tool.name, tool.description);
            if tool.accepts_modules() {
                println!("  {:<22} modules: {}", "", tool.modules.join(", "));
                println!("  {:<22} default: {}", "", tool.default_modules.join(", "));
            }
        }
    }
}

/// Simple dry-run output: print the plan and the effective engine settings.
fn print_dry_run(cfg: &ConfigFile, plan: &BatchPlan) {
    println!("triagerun dry-run");
    println!("  engine.max_running = {}", cfg.engine.max_running);
    println!("  engine.max_provisioning = {}", cfg.engine.max_provisioning);
    println!("  engine.cancel_mode = {:?}", cfg.engine.cancel_mode);
    println!("  output = {}", plan.output_root.display());
    println!();

    println!("tasks ({}):", plan.tasks.len());
    for planned in &plan.tasks {
        let task = &planned.instance;
        println!("  - {} [{}]", task.name, task.definition.category);
        println!("      output: {}", task.output_dir.display());
        if !task.modules.is_empty() {
            println!("      modules: {}", task.modules.join(", "));
        }
        for command in &task.definition.commands {
            println!("      cmd: {command}");
        }
        if let Some(reason) = planned.skip {
            println!("      skipped: {reason}");
        }
    }

    debug!("dry-run complete (no execution)");
}

fn print_status(event: &StatusEvent) {
    let time = event.timestamp.with_timezone(&Local).format("%H:%M:%S");
    match (&event.failure, &event.skip_reason) {
        (Some(failure), _) => println!("[{time}] {:<22} {} ({failure})", event.task, event.status),
        (None, Some(reason)) => println!("[{time}] {:<22} {} ({reason})", event.task, event.status),
        (None, None) => println!("[{time}] {:<22} {}", event.task, event.status),
    }
}

fn print_summary(report: &BatchReport) {
    use crate::types::TaskStatus;

    println!();
    println!(
        "batch {}: {} succeeded, {} failed, {} skipped{}",
        report.outcome,
        report.count(TaskStatus::Succeeded),
        report.count(TaskStatus::Failed),
        report.count(TaskStatus::Skipped),
        if report.cancelled { " (cancelled)" } else { "" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(flags: &[&str]) -> CliArgs {
        let mut argv = vec!["triagerun"];
        argv.extend_from_slice(flags);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn cli_overrides_config() {
        let mut cfg = ConfigFile::default();
        apply_cli_overrides(&mut cfg, &args(&["--max-running", "2", "--output", "/tmp/o"])).unwrap();
        assert_eq!(cfg.engine.max_running, 2);
        assert_eq!(cfg.paths.output_dir, std::path::PathBuf::from("/tmp/o"));

        let err = apply_cli_overrides(&mut cfg, &args(&["--max-provisioning", "0"])).unwrap_err();
        assert!(matches!(err, TriageError::ConfigError(_)));
    }

    #[test]
    fn modules_flag_targets_memory_tools() {
        let catalog = ToolCatalog::builtin().unwrap();
        let cfg = ConfigFile::default();

        let selection = build_selection(
            &catalog,
            &cfg,
            &args(&["--tool", "PECmd", "--tool", "volatility3", "--module", "pslist"]),
        )
        .unwrap();
        assert_eq!(selection.modules.get("Volatility3"), Some(&vec!["pslist".to_string()]));
        assert!(!selection.modules.contains_key("PECmd"));

        let err = build_selection(&catalog, &cfg, &args(&["--tool", "PECmd", "--module", "pslist"]))
            .unwrap_err();
        assert!(matches!(err, TriageError::Selection(_)));
    }

    #[test]
    fn all_selects_whole_catalog() {
        let catalog = ToolCatalog::builtin().unwrap();
        let selection = build_selection(&catalog, &ConfigFile::default(), &args(&["--all"])).unwrap();
        assert_eq!(selection.tools.len(), catalog.all().len());
    }
}
