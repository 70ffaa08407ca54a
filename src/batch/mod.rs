// src/batch/mod.rs

//! Batches: expanding a selection into tasks and the pure scheduler that
//! walks them through provisioning and running.
//!
//! - [`plan`] resolves a [`Selection`] into a [`BatchPlan`].
//! - [`scheduler`] owns per-task lifecycle state and the phase ceilings.
//! - [`step`] holds the structured results returned by the scheduler.

pub mod plan;
pub mod scheduler;
pub mod step;
pub mod task;

pub use plan::{plan_batch, Selection};
pub use scheduler::{Scheduler, SchedulerLimits};
pub use step::{RunOrder, SchedulerStep, StatusChange};
pub use task::{BatchPlan, PlannedTask, TaskInstance, TaskName};
