// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::batch::{RunOrder, Scheduler, SchedulerStep, StatusChange, TaskInstance};
use crate::engine::core::CancelPolicy;
use crate::errors::{ProvisionError, RunError};
use crate::provision::ProvisionedBinary;
use crate::types::CancelMode;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Publish these status changes to observers.
    Publish(Vec<StatusChange>),
    /// Start the provisioning phase of a task.
    Provision(Arc<TaskInstance>),
    /// Start the run phase of a provisioned task.
    Run(RunOrder),
    /// Ask running processes to stop, killing them after `grace`.
    TerminateRunning { grace: Duration },
    /// Every task is terminal; the batch is over.
    Finish,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Translate a scheduler step into shell commands.
///
/// Status changes are published before new work is started, so observers
/// see `Provisioning`/`Running` before any result for that phase can arrive.
pub fn commands_from_step(step: SchedulerStep) -> CoreStep {
    let mut commands = Vec::new();

    if !step.transitions.is_empty() {
        commands.push(CoreCommand::Publish(step.transitions));
    }
    commands.extend(step.provision.into_iter().map(CoreCommand::Provision));
    commands.extend(step.run.into_iter().map(CoreCommand::Run));

    let keep_running = !step.batch_finished;
    if step.batch_finished {
        commands.push(CoreCommand::Finish);
    }

    CoreStep {
        commands,
        keep_running,
    }
}

/// Handle the end of a provisioning phase.
pub fn handle_provisioned(
    scheduler: &mut Scheduler,
    task: &str,
    result: Result<ProvisionedBinary, ProvisionError>,
) -> CoreStep {
    commands_from_step(scheduler.on_provisioned(task, result))
}

/// Handle the end of a run phase.
pub fn handle_finished(
    scheduler: &mut Scheduler,
    task: &str,
    outcome: Result<(), RunError>,
) -> CoreStep {
    commands_from_step(scheduler.on_completed(task, outcome))
}

/// Handle a cancellation request.
///
/// In terminate mode, tasks still running are asked to stop; their
/// completions then arrive as ordinary `TaskFinished` events.
pub fn handle_cancel(scheduler: &mut Scheduler, policy: &CancelPolicy) -> CoreStep {
    let was_cancelled = scheduler.is_cancelled();
    let mut core_step = commands_from_step(scheduler.cancel());

    if !was_cancelled
        && policy.mode == CancelMode::Terminate
        && scheduler.running_count() > 0
    {
        debug!(
            running = scheduler.running_count(),
            grace = ?policy.grace_period,
            "cancel: terminating running tasks"
        );
        core_step.commands.push(CoreCommand::TerminateRunning {
            grace: policy.grace_period,
        });
    }

    core_step
}
