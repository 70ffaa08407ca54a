// src/batch/task.rs

//! Task instances and the per-batch plan.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::catalog::ToolDefinition;
use crate::errors::SkipReason;
use crate::types::InputKind;

/// Canonical task name type used throughout the engine (the tool identity).
pub type TaskName = String;

/// One tool to run within one batch. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub name: TaskName,
    pub definition: Arc<ToolDefinition>,
    pub triage_root: Option<PathBuf>,
    pub memory_image: Option<PathBuf>,
    /// Assigned by the `ResultOrganizer`; unique within the batch.
    pub output_dir: PathBuf,
    /// Selected modules (empty for tools without modules).
    pub modules: Vec<String>,
    /// Batch timestamp substituted for `{timestamp}` (`%Y%m%d%H%M%S`).
    pub timestamp: String,
}

impl TaskInstance {
    /// First required input kind that was not supplied.
    pub fn missing_input(&self) -> Option<InputKind> {
        self.definition.inputs.iter().copied().find(|kind| match kind {
            InputKind::TriageRoot => self.triage_root.is_none(),
            InputKind::MemoryImage => self.memory_image.is_none(),
        })
    }
}

/// A planned task, possibly skipped before it starts.
#[derive(Debug, Clone)]
pub struct PlannedTask {
    pub instance: Arc<TaskInstance>,
    pub skip: Option<SkipReason>,
}

/// All tasks of one batch, in selection order.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub tasks: Vec<PlannedTask>,
    pub output_root: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl BatchPlan {
    pub fn runnable(&self) -> impl Iterator<Item = &Arc<TaskInstance>> {
        self.tasks
            .iter()
            .filter(|t| t.skip.is_none())
            .map(|t| &t.instance)
    }
}
