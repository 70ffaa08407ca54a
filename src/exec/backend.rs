// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of spawning work
//! itself. Production uses [`RealExecutorBackend`], which provisions through
//! the [`BinaryProvisioner`] and runs tool processes with
//! [`run_task`](super::task_runner::run_task). Tests provide their own
//! backend that records requests and emits `RuntimeEvent`s directly.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::batch::{RunOrder, TaskInstance, TaskName};
use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::exec::task_runner::{run_task, RunnerSettings};
use crate::provision::BinaryProvisioner;

pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Trait abstracting how provisioning and run phases are carried out.
///
/// Each call starts the work and returns; the outcome arrives later as a
/// `RuntimeEvent` on the runtime's channel.
pub trait ExecutorBackend: Send {
    /// Start the Provisioning phase of `task`; report `ProvisionFinished`.
    fn provision(&mut self, task: Arc<TaskInstance>) -> BackendFuture<'_>;

    /// Start the Running phase; report `TaskFinished`.
    fn run(&mut self, order: RunOrder) -> BackendFuture<'_>;

    /// Ask every running task to stop within `grace`.
    fn terminate_running(&mut self, grace: Duration) -> BackendFuture<'_>;
}

/// Internal handle for a running task.
///
/// `terminate` carries the grace period to the runner; `handle` is the Tokio
/// task driving the process(es).
struct ActiveTask {
    terminate: Option<oneshot::Sender<Duration>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    provisioner: BinaryProvisioner,
    settings: Arc<RunnerSettings>,
    active: HashMap<TaskName, ActiveTask>,
}

impl RealExecutorBackend {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        provisioner: BinaryProvisioner,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            runtime_tx,
            provisioner,
            settings: Arc::new(settings),
            active: HashMap::new(),
        }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn provision(&mut self, task: Arc<TaskInstance>) -> BackendFuture<'_> {
        let provisioner = self.provisioner.clone();
        let tx = self.runtime_tx.clone();

        Box::pin(async move {
            tokio::spawn(async move {
                let result = provisioner.ensure(&task.definition).await;
                let event = RuntimeEvent::ProvisionFinished {
                    task: task.name.clone(),
                    result,
                };
                if tx.send(event).await.is_err() {
                    debug!(task = %task.name, "runtime gone; dropping provisioning result");
                }
            });
            Ok(())
        })
    }

    fn run(&mut self, order: RunOrder) -> BackendFuture<'_> {
        self.active.retain(|_, active| !active.handle.is_finished());

        let (terminate_tx, terminate_rx) = oneshot::channel::<Duration>();
        let tx = self.runtime_tx.clone();
        let settings = Arc::clone(&self.settings);
        let name = order.task.name.clone();

        let handle = tokio::spawn(async move {
            let RunOrder { task, binary } = order;
            let outcome = run_task(&task, &binary, &settings, terminate_rx).await;
            let event = RuntimeEvent::TaskFinished {
                task: task.name.clone(),
                outcome,
            };
            if tx.send(event).await.is_err() {
                debug!(task = %task.name, "runtime gone; dropping task outcome");
            }
        });

        self.active.insert(
            name,
            ActiveTask {
                terminate: Some(terminate_tx),
                handle,
            },
        );

        Box::pin(async { Ok(()) })
    }

    fn terminate_running(&mut self, grace: Duration) -> BackendFuture<'_> {
        let mut signalled = 0usize;
        for (name, active) in self.active.iter_mut() {
            if active.handle.is_finished() {
                continue;
            }
            if let Some(terminate) = active.terminate.take() {
                if terminate.send(grace).is_ok() {
                    debug!(task = %name, ?grace, "termination requested");
                    signalled += 1;
                }
            }
        }
        info!(tasks = signalled, ?grace, "terminating running tasks");

        Box::pin(async { Ok(()) })
    }
}
