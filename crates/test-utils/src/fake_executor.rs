use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use triagerun::batch::{RunOrder, TaskInstance};
use triagerun::engine::RuntimeEvent;
use triagerun::errors::{ProvisionError, RunError};
use triagerun::exec::{BackendFuture, ExecutorBackend};

use crate::builders::binary_for;

/// One request the runtime made of the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Provision(String),
    Run(String),
    Terminate(Duration),
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    provision_results: HashMap<String, Result<(), ProvisionError>>,
    run_results: HashMap<String, Result<(), RunError>>,
    held: Vec<String>,
    running_now: usize,
    max_running_seen: usize,
}

/// Shared view of a [`FakeExecutor`], kept by the test after the executor
/// moves into the runtime.
#[derive(Clone)]
pub struct FakeHandle {
    state: Arc<Mutex<State>>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
}

impl FakeHandle {
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Names of tasks the runtime started running, in order.
    pub fn runs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Run(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn max_running_seen(&self) -> usize {
        self.state.lock().unwrap().max_running_seen
    }

    /// Tasks currently held in the Running phase.
    pub fn held(&self) -> Vec<String> {
        self.state.lock().unwrap().held.clone()
    }

    /// Complete every held run with its scripted result.
    pub async fn release_all(&self) {
        let events: Vec<RuntimeEvent> = {
            let mut state = self.state.lock().unwrap();
            let held: Vec<String> = state.held.drain(..).collect();
            state.running_now -= held.len();
            held.into_iter()
                .map(|task| {
                    let outcome = state.run_results.get(&task).cloned().unwrap_or(Ok(()));
                    RuntimeEvent::TaskFinished { task, outcome }
                })
                .collect()
        };
        for event in events {
            self.runtime_tx.send(event).await.unwrap();
        }
    }
}

/// A fake executor that:
/// - records every provision / run / terminate request
/// - immediately reports the scripted provisioning result (default: an
///   operator binary)
/// - reports the scripted run result (default: success), either immediately
///   or, with [`FakeExecutor::hold_runs`], when the test releases it.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    state: Arc<Mutex<State>>,
    hold_runs: bool,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            runtime_tx,
            state: Arc::new(Mutex::new(State::default())),
            hold_runs: false,
        }
    }

    /// Keep runs in the Running phase until [`FakeHandle::release_all`]
    /// or a termination request.
    pub fn hold_runs(mut self) -> Self {
        self.hold_runs = true;
        self
    }

    pub fn fail_provision(self, task: &str, err: ProvisionError) -> Self {
        self.state
            .lock()
            .unwrap()
            .provision_results
            .insert(task.to_string(), Err(err));
        self
    }

    pub fn fail_run(self, task: &str, err: RunError) -> Self {
        self.state
            .lock()
            .unwrap()
            .run_results
            .insert(task.to_string(), Err(err));
        self
    }

    pub fn handle(&self) -> FakeHandle {
        FakeHandle {
            state: Arc::clone(&self.state),
            runtime_tx: self.runtime_tx.clone(),
        }
    }
}

impl ExecutorBackend for FakeExecutor {
    fn provision(&mut self, task: Arc<TaskInstance>) -> BackendFuture<'_> {
        let tx = self.runtime_tx.clone();
        let result = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Provision(task.name.clone()));
            match state.provision_results.get(&task.name).cloned() {
                Some(Err(e)) => Err(e),
                _ => Ok(binary_for(&task.name)),
            }
        };

        Box::pin(async move {
            tx.send(RuntimeEvent::ProvisionFinished {
                task: task.name.clone(),
                result,
            })
            .await
            .map_err(anyhow::Error::from)?;
            Ok(())
        })
    }

    fn run(&mut self, order: RunOrder) -> BackendFuture<'_> {
        let tx = self.runtime_tx.clone();
        let name = order.task.name.clone();
        let hold = self.hold_runs;

        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Run(name.clone()));
            state.running_now += 1;
            state.max_running_seen = state.max_running_seen.max(state.running_now);
            if hold {
                state.held.push(name.clone());
                None
            } else {
                state.running_now -= 1;
                Some(state.run_results.get(&name).cloned().unwrap_or(Ok(())))
            }
        };

        Box::pin(async move {
            if let Some(outcome) = outcome {
                tx.send(RuntimeEvent::TaskFinished {
                    task: name,
                    outcome,
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }

    fn terminate_running(&mut self, grace: Duration) -> BackendFuture<'_> {
        let tx = self.runtime_tx.clone();
        let terminated: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Terminate(grace));
            let held: Vec<String> = state.held.drain(..).collect();
            state.running_now -= held.len();
            held
        };

        Box::pin(async move {
            for task in terminated {
                tx.send(RuntimeEvent::TaskFinished {
                    task,
                    outcome: Err(RunError::ProcessExit(-1)),
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }
}
