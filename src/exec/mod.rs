// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually provisioning binaries and running
//! the tool processes of each task, using `tokio::process::Command`, and
//! reporting back to the orchestration runtime via `RuntimeEvent`s.
//!
//! - [`task_runner`] handles one task's process(es) and classifies the result.
//! - [`log_sink`] writes the per-task execution log.
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod log_sink;
pub mod task_runner;

pub use backend::{BackendFuture, ExecutorBackend, RealExecutorBackend};
pub use task_runner::{run_task, RunnerSettings, LOG_FILE};
