// src/batch/step.rs

//! Result types for scheduler steps.

use std::sync::Arc;

use crate::batch::task::{TaskInstance, TaskName};
use crate::errors::{SkipReason, TaskFailure};
use crate::provision::ProvisionedBinary;
use crate::types::TaskStatus;

/// One accepted status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub task: TaskName,
    pub status: TaskStatus,
    pub failure: Option<TaskFailure>,
    pub skip_reason: Option<SkipReason>,
}

/// A provisioned task cleared to start.
#[derive(Debug, Clone)]
pub struct RunOrder {
    pub task: Arc<TaskInstance>,
    pub binary: ProvisionedBinary,
}

/// Structured result of a single scheduler step.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Status transitions, in the order they happened.
    pub transitions: Vec<StatusChange>,
    /// Tasks that entered Provisioning in this step.
    pub provision: Vec<Arc<TaskInstance>>,
    /// Tasks that entered Running in this step.
    pub run: Vec<RunOrder>,
    /// Whether this step made every task terminal.
    pub batch_finished: bool,
}
