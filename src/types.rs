// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Coarse grouping of tools; also the first level of the output tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCategory {
    ArtifactCollection,
    MemoryAnalysis,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 2] = [ToolCategory::ArtifactCollection, ToolCategory::MemoryAnalysis];

    /// Directory name under the output root.
    pub fn dir_name(self) -> &'static str {
        match self {
            ToolCategory::ArtifactCollection => "artifact-collection",
            ToolCategory::MemoryAnalysis => "memory-analysis",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Kind of user-supplied input a tool reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputKind {
    /// Root of a collected triage image (a copy of `C:\`).
    TriageRoot,
    /// A captured memory image file.
    MemoryImage,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputKind::TriageRoot => f.write_str("triage-root"),
            InputKind::MemoryImage => f.write_str("memory-image"),
        }
    }
}

/// Lifecycle of one task inside a batch.
///
/// Transitions only move forward: `Pending -> Provisioning -> Running ->
/// {Succeeded, Failed}`, with `Failed` and `Skipped` reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Provisioning,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    fn rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Provisioning => 1,
            TaskStatus::Running => 2,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Provisioning => "provisioning",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Overall result of a batch once every task is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Every task Succeeded or was Skipped.
    Succeeded,
    /// At least one task Succeeded and at least one Failed.
    PartialFailure,
    /// Every attempted (non-skipped) task Failed.
    TotalFailure,
}

impl BatchOutcome {
    /// Compute the outcome from terminal statuses. Non-terminal statuses are
    /// not expected here and are treated like Skipped.
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = TaskStatus>,
    {
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for status in statuses {
            match status {
                TaskStatus::Succeeded => succeeded += 1,
                TaskStatus::Failed => failed += 1,
                _ => {}
            }
        }

        match (succeeded, failed) {
            (_, 0) => BatchOutcome::Succeeded,
            (0, _) => BatchOutcome::TotalFailure,
            _ => BatchOutcome::PartialFailure,
        }
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchOutcome::Succeeded => "succeeded",
            BatchOutcome::PartialFailure => "partial failure",
            BatchOutcome::TotalFailure => "total failure",
        };
        f.write_str(s)
    }
}

/// What a user cancellation does to processes that are already running.
///
/// - `Drain`: let running processes finish naturally (default).
/// - `Terminate`: ask them to stop, wait for the grace period, then kill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelMode {
    Drain,
    Terminate,
}

impl Default for CancelMode {
    fn default() -> Self {
        CancelMode::Drain
    }
}

impl FromStr for CancelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drain" => Ok(CancelMode::Drain),
            "terminate" => Ok(CancelMode::Terminate),
            other => Err(format!(
                "invalid cancel_mode: {other} (expected \"drain\" or \"terminate\")"
            )),
        }
    }
}

/// Working directory a tool's processes are started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkingDir {
    /// The task's own output directory.
    Output,
    /// The directory containing the provisioned executable.
    Tool,
}

impl Default for WorkingDir {
    fn default() -> Self {
        WorkingDir::Output
    }
}
