// src/report.rs

//! Batch report written to `<output_root>/report.json`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::{Result, SkipReason, TaskFailure};
use crate::types::{BatchOutcome, TaskStatus, ToolCategory};

pub const REPORT_FILE: &str = "report.json";

/// Terminal record of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub tool: String,
    pub category: ToolCategory,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    pub output_dir: PathBuf,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: BatchOutcome,
    pub cancelled: bool,
    pub output_root: PathBuf,
    pub tasks: Vec<TaskRecord>,
}

impl BatchReport {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn task(&self, tool: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.tool == tool)
    }

    /// Write the report as pretty JSON into `dir`; returns the file path.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(REPORT_FILE);
        let json = serde_json::to_vec_pretty(self).map_err(|e| crate::errors::TriageError::Other(e.into()))?;
        std::fs::create_dir_all(dir)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}
