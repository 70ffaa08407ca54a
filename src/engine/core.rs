// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - handing provisioning and run phases to the executor backend
//! - publishing status events
//!
//! The core is intended to be extensively unit tested without any Tokio,
//! channels, filesystem, or processes.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::batch::{BatchPlan, Scheduler, SchedulerLimits};
use crate::engine::event_handlers::{
    commands_from_step, handle_cancel, handle_finished, handle_provisioned, CoreStep,
};
use crate::engine::RuntimeEvent;
use crate::report::BatchReport;
use crate::types::CancelMode;

/// What cancellation does to running processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelPolicy {
    pub mode: CancelMode,
    pub grace_period: Duration,
}

impl Default for CancelPolicy {
    fn default() -> Self {
        Self {
            mode: CancelMode::Drain,
            grace_period: Duration::from_secs(10),
        }
    }
}

/// Pure core runtime state.
///
/// This owns the batch scheduler and the cancellation policy. It has **no**
/// channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    policy: CancelPolicy,
    output_root: PathBuf,
    started_at: DateTime<Utc>,
}

impl CoreRuntime {
    pub fn new(plan: BatchPlan, limits: SchedulerLimits, policy: CancelPolicy) -> Self {
        let BatchPlan {
            tasks,
            output_root,
            started_at,
        } = plan;
        Self {
            scheduler: Scheduler::new(tasks, limits),
            policy,
            output_root,
            started_at,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Begin the batch.
    pub fn start(&mut self) -> CoreStep {
        commands_from_step(self.scheduler.start())
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::ProvisionFinished { task, result } => {
                handle_provisioned(&mut self.scheduler, &task, result)
            }
            RuntimeEvent::TaskFinished { task, outcome } => {
                handle_finished(&mut self.scheduler, &task, outcome)
            }
            RuntimeEvent::CancelRequested => handle_cancel(&mut self.scheduler, &self.policy),
        }
    }

    /// Snapshot of the batch as a report.
    pub fn report(&self, finished_at: DateTime<Utc>) -> BatchReport {
        BatchReport {
            started_at: self.started_at,
            finished_at,
            outcome: self.scheduler.outcome(),
            cancelled: self.scheduler.is_cancelled(),
            output_root: self.output_root.clone(),
            tasks: self.scheduler.records(),
        }
    }
}
