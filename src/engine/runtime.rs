// src/engine/runtime.rs

use std::fmt;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::batch::StatusChange;
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::report::BatchReport;

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent, StatusEvent};

/// Drives the batch scheduler in response to `RuntimeEvent`s, and delegates
/// provisioning and process execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading events from
/// channels, dispatching phases to the executor and publishing
/// [`StatusEvent`]s.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    status_tx: Option<mpsc::UnboundedSender<StatusEvent>>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(core: CoreRuntime, event_rx: mpsc::Receiver<RuntimeEvent>, executor: E) -> Self {
        Self {
            core,
            event_rx,
            executor,
            status_tx: None,
        }
    }

    /// Publish every status change on `tx`.
    pub fn with_status_events(mut self, tx: mpsc::UnboundedSender<StatusEvent>) -> Self {
        self.status_tx = Some(tx);
        self
    }

    /// Main event loop.
    ///
    /// - Starts the batch.
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core runtime.
    /// - Executes commands returned by the core.
    ///
    /// Returns the batch report once every task is terminal (or the event
    /// channel closes early, in which case unfinished tasks keep their
    /// last status).
    pub async fn run(mut self) -> Result<BatchReport> {
        info!("batch runtime started");

        let step = self.core.start();
        let mut keep_running = step.keep_running;
        for command in step.commands {
            self.execute_command(command).await?;
        }

        while keep_running {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    warn!("runtime event channel closed before the batch finished");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);
            for command in step.commands {
                self.execute_command(command).await?;
            }
            keep_running = step.keep_running;
        }

        let report = self.core.report(Utc::now());
        info!(
            outcome = %report.outcome,
            cancelled = report.cancelled,
            tasks = report.tasks.len(),
            "batch runtime exiting"
        );
        Ok(report)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Publish(changes) => self.publish(changes),
            CoreCommand::Provision(task) => {
                debug!(task = %task.name, "starting provisioning");
                self.executor.provision(task).await?;
            }
            CoreCommand::Run(order) => {
                debug!(task = %order.task.name, exe = %order.binary.executable.display(), "starting run");
                self.executor.run(order).await?;
            }
            CoreCommand::TerminateRunning { grace } => {
                self.executor.terminate_running(grace).await?;
            }
            CoreCommand::Finish => {
                info!("core issued Finish command");
            }
        }
        Ok(())
    }

    fn publish(&mut self, changes: Vec<StatusChange>) {
        let timestamp = Utc::now();
        for change in changes {
            info!(task = %change.task, status = %change.status, "task status");
            let Some(tx) = &self.status_tx else {
                continue;
            };
            let event = StatusEvent {
                task: change.task,
                status: change.status,
                timestamp,
                failure: change.failure,
                skip_reason: change.skip_reason,
            };
            if tx.send(event).is_err() {
                debug!("status observer gone; no longer publishing");
                self.status_tx = None;
            }
        }
    }
}
