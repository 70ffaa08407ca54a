// src/engine/mod.rs

//! Orchestration engine for a batch.
//!
//! This module ties together:
//! - the pure batch [`Scheduler`](crate::batch::Scheduler)
//! - the cancellation policy (drain or terminate)
//! - the main runtime event loop that reacts to:
//!   - provisioning results
//!   - task completion events
//!   - cancellation requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use chrono::{DateTime, Utc};

use crate::batch::TaskName;
use crate::errors::{ProvisionError, RunError, SkipReason, TaskFailure};
use crate::provision::ProvisionedBinary;
use crate::types::TaskStatus;

/// Events flowing into the runtime from the executor and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// The provisioning phase of a task finished.
    ProvisionFinished {
        task: TaskName,
        result: Result<ProvisionedBinary, ProvisionError>,
    },
    /// The run phase of a task finished.
    TaskFinished {
        task: TaskName,
        outcome: Result<(), RunError>,
    },
    /// The user asked to cancel the batch (e.g. Ctrl-C).
    CancelRequested,
}

/// Progress notification published for every accepted status change.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub task: TaskName,
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
    pub failure: Option<TaskFailure>,
    pub skip_reason: Option<SkipReason>,
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use core::{CancelPolicy, CoreRuntime};
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
