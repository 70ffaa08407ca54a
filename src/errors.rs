// src/errors.rs

//! Crate-wide error types.
//!
//! Three layers:
//! - [`TriageError`]: engine-level failures that abort the whole run
//!   (configuration, catalog, selection, output path collisions).
//! - [`ProvisionError`]: contained to a single task's Provisioning phase.
//! - [`RunError`]: contained to a single task's Running phase.

use serde::Serialize;
use thiserror::Error;

use crate::types::InputKind;

#[derive(Error, Debug)]
pub enum TriageError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Catalog load error: {0}")]
    CatalogLoad(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Selection error: {0}")]
    Selection(String),

    #[error("Output path collision: {0}")]
    PathCollision(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure while making a tool's executable available.
///
/// `Clone` because a single in-flight provisioning result is shared by every
/// caller waiting on the same tool.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProvisionError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("archive extraction failed: {0}")]
    Extraction(String),

    #[error("binary unavailable: {0}")]
    Unavailable(String),
}

impl ProvisionError {
    /// Whether a later `ensure` for the same tool may succeed.
    ///
    /// Integrity failures are never retried: the release source served bytes
    /// that do not match the known-good checksum.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProvisionError::Download(_))
    }
}

/// Failure of a provisioned task's external process(es).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RunError {
    /// The process could not be started at all. Points at provisioning or
    /// environment problems rather than at the tool.
    #[error("failed to launch: {0}")]
    Launch(String),

    #[error("process exited with code {0}")]
    ProcessExit(i32),

    /// The tool exited 0 but left nothing in its output directory.
    #[error("process succeeded but produced no output")]
    EmptyOutput,
}

/// Error kind attached to a Failed task.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "error", rename_all = "snake_case")]
pub enum TaskFailure {
    #[error("provisioning: {0}")]
    Provision(ProvisionError),

    #[error("run: {0}")]
    Run(RunError),
}

impl From<ProvisionError> for TaskFailure {
    fn from(err: ProvisionError) -> Self {
        TaskFailure::Provision(err)
    }
}

impl From<RunError> for TaskFailure {
    fn from(err: RunError) -> Self {
        TaskFailure::Run(err)
    }
}

/// Why a task was Skipped instead of attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "input", rename_all = "snake_case")]
pub enum SkipReason {
    MissingInput(InputKind),
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingInput(kind) => write!(f, "missing input {kind}"),
            SkipReason::Cancelled => write!(f, "batch cancelled"),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TriageError>;
