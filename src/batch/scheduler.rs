// src/batch/scheduler.rs

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::batch::step::{RunOrder, SchedulerStep, StatusChange};
use crate::batch::task::{PlannedTask, TaskInstance, TaskName};
use crate::errors::{ProvisionError, RunError, SkipReason, TaskFailure};
use crate::provision::ProvisionedBinary;
use crate::report::TaskRecord;
use crate::types::{BatchOutcome, TaskStatus};

/// Independent ceilings of the two pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerLimits {
    pub max_running: usize,
    pub max_provisioning: usize,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self {
            max_running: 4,
            max_provisioning: 1,
        }
    }
}

/// Internal pipeline position of a task.
#[derive(Debug, Clone)]
enum Phase {
    Pending,
    Provisioning,
    /// Provisioned, waiting in the FIFO run queue. Public status stays
    /// Provisioning.
    AwaitingRun(ProvisionedBinary),
    Running,
    Done,
}

#[derive(Debug)]
struct TaskEntry {
    instance: Arc<TaskInstance>,
    phase: Phase,
    status: TaskStatus,
    failure: Option<TaskFailure>,
    skip_reason: Option<SkipReason>,
    binary: Option<ProvisionedBinary>,
}

/// Pure batch state machine.
///
/// It is responsible for:
/// - moving every task through Pending -> Provisioning -> Running -> terminal
/// - keeping the Provisioning and Running ceilings
/// - containing failures to the task they happened in
/// - cancellation (skip what has not started, let started work finish)
///
/// Every input returns a [`SchedulerStep`] describing what changed and what
/// the caller should start next. No IO happens here.
#[derive(Debug)]
pub struct Scheduler {
    order: Vec<TaskName>,
    tasks: HashMap<TaskName, TaskEntry>,
    pending: VecDeque<TaskName>,
    awaiting_run: VecDeque<TaskName>,
    provisioning: usize,
    running: usize,
    limits: SchedulerLimits,
    started: bool,
    cancelled: bool,
    finished: bool,
}

impl Scheduler {
    pub fn new(plan: Vec<PlannedTask>, limits: SchedulerLimits) -> Self {
        let limits = SchedulerLimits {
            max_running: limits.max_running.max(1),
            max_provisioning: limits.max_provisioning.max(1),
        };

        let mut order = Vec::with_capacity(plan.len());
        let mut tasks = HashMap::with_capacity(plan.len());
        for planned in plan {
            let name = planned.instance.name.clone();
            if tasks.contains_key(&name) {
                warn!(task = %name, "duplicate task in plan; keeping the first");
                continue;
            }
            order.push(name.clone());
            tasks.insert(
                name,
                TaskEntry {
                    instance: planned.instance,
                    phase: Phase::Pending,
                    status: TaskStatus::Pending,
                    failure: None,
                    skip_reason: planned.skip,
                    binary: None,
                },
            );
        }

        Self {
            order,
            tasks,
            pending: VecDeque::new(),
            awaiting_run: VecDeque::new(),
            provisioning: 0,
            running: 0,
            limits,
            started: false,
            cancelled: false,
            finished: false,
        }
    }

    pub fn limits(&self) -> SchedulerLimits {
        self.limits
    }

    pub fn status_of(&self, task: &str) -> Option<TaskStatus> {
        self.tasks.get(task).map(|e| e.status)
    }

    pub fn running_count(&self) -> usize {
        self.running
    }

    pub fn provisioning_count(&self) -> usize {
        self.provisioning
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Names of tasks, in plan order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Overall outcome over current statuses.
    pub fn outcome(&self) -> BatchOutcome {
        BatchOutcome::from_statuses(self.tasks.values().map(|e| e.status))
    }

    /// Per-task records, in plan order.
    pub fn records(&self) -> Vec<TaskRecord> {
        self.order
            .iter()
            .filter_map(|name| self.tasks.get(name))
            .map(|e| TaskRecord {
                tool: e.instance.name.clone(),
                category: e.instance.definition.category,
                status: e.status,
                failure: e.failure.clone(),
                skip_reason: e.skip_reason,
                output_dir: e.instance.output_dir.clone(),
                modules: e.instance.modules.clone(),
                executable: e.binary.as_ref().map(|b| b.executable.clone()),
                version: e.binary.as_ref().map(|b| b.version.clone()),
            })
            .collect()
    }

    /// Begin the batch: skip tasks planned as skipped and dispatch the rest.
    pub fn start(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.started {
            warn!("scheduler: start called twice; ignoring");
            return step;
        }
        self.started = true;

        for name in self.order.clone() {
            let pre_skip = self.tasks.get(&name).and_then(|e| e.skip_reason);
            match pre_skip {
                Some(reason) => self.skip(&name, reason, &mut step),
                None => self.pending.push_back(name),
            }
        }

        info!(
            tasks = self.order.len(),
            runnable = self.pending.len(),
            max_running = self.limits.max_running,
            max_provisioning = self.limits.max_provisioning,
            "scheduler: batch started"
        );

        self.dispatch(&mut step);
        step
    }

    /// Provisioning of `task` finished.
    pub fn on_provisioned(
        &mut self,
        task: &str,
        result: Result<ProvisionedBinary, ProvisionError>,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let in_phase = matches!(self.tasks.get(task).map(|e| &e.phase), Some(Phase::Provisioning));
        if !in_phase {
            warn!(task = %task, "provisioning result for a task that is not provisioning; ignoring");
            return step;
        }
        self.provisioning -= 1;

        if self.cancelled {
            debug!(task = %task, "provisioning finished after cancellation");
            self.skip(task, SkipReason::Cancelled, &mut step);
        } else {
            match result {
                Ok(binary) => {
                    if let Some(entry) = self.tasks.get_mut(task) {
                        entry.binary = Some(binary.clone());
                        entry.phase = Phase::AwaitingRun(binary);
                    }
                    self.awaiting_run.push_back(task.to_string());
                }
                Err(err) => self.fail(task, TaskFailure::Provision(err), &mut step),
            }
        }

        self.dispatch(&mut step);
        step
    }

    /// The run phase of `task` finished.
    pub fn on_completed(&mut self, task: &str, result: Result<(), RunError>) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let in_phase = matches!(self.tasks.get(task).map(|e| &e.phase), Some(Phase::Running));
        if !in_phase {
            warn!(task = %task, "completion for a task that is not running; ignoring");
            return step;
        }
        self.running -= 1;

        match result {
            Ok(()) => {
                if self.transition(task, TaskStatus::Succeeded, None, None, &mut step) {
                    self.set_phase(task, Phase::Done);
                }
            }
            Err(err) => self.fail(task, TaskFailure::Run(err), &mut step),
        }

        self.dispatch(&mut step);
        step
    }

    /// Cooperative cancellation: nothing new starts; Pending and queued tasks
    /// are Skipped now, in-flight provisioning is Skipped when it returns,
    /// Running tasks finish.
    pub fn cancel(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.cancelled || self.finished {
            return step;
        }
        self.cancelled = true;
        info!(
            running = self.running,
            provisioning = self.provisioning,
            pending = self.pending.len(),
            "scheduler: batch cancelled"
        );

        let waiting: Vec<TaskName> = self.pending.drain(..).chain(self.awaiting_run.drain(..)).collect();
        for name in waiting {
            self.skip(&name, SkipReason::Cancelled, &mut step);
        }

        self.check_finished(&mut step);
        step
    }

    fn dispatch(&mut self, step: &mut SchedulerStep) {
        if !self.cancelled {
            while self.running < self.limits.max_running {
                let Some(name) = self.awaiting_run.pop_front() else {
                    break;
                };
                let binary = match self.tasks.get(&name).map(|e| &e.phase) {
                    Some(Phase::AwaitingRun(binary)) => binary.clone(),
                    _ => continue,
                };
                if self.transition(&name, TaskStatus::Running, None, None, step) {
                    self.set_phase(&name, Phase::Running);
                    self.running += 1;
                    if let Some(entry) = self.tasks.get(&name) {
                        step.run.push(RunOrder {
                            task: Arc::clone(&entry.instance),
                            binary,
                        });
                    }
                }
            }

            while self.provisioning < self.limits.max_provisioning {
                let Some(name) = self.pending.pop_front() else {
                    break;
                };
                if self.transition(&name, TaskStatus::Provisioning, None, None, step) {
                    self.set_phase(&name, Phase::Provisioning);
                    self.provisioning += 1;
                    if let Some(entry) = self.tasks.get(&name) {
                        step.provision.push(Arc::clone(&entry.instance));
                    }
                }
            }
        }

        self.check_finished(step);
    }

    fn check_finished(&mut self, step: &mut SchedulerStep) {
        if self.finished {
            return;
        }
        if self.tasks.values().all(|e| e.status.is_terminal()) {
            self.finished = true;
            step.batch_finished = true;
            info!(outcome = %self.outcome(), "scheduler: all tasks terminal");
        }
    }

    fn skip(&mut self, task: &str, reason: SkipReason, step: &mut SchedulerStep) {
        if self.transition(task, TaskStatus::Skipped, None, Some(reason), step) {
            self.set_phase(task, Phase::Done);
        }
    }

    fn fail(&mut self, task: &str, failure: TaskFailure, step: &mut SchedulerStep) {
        if self.transition(task, TaskStatus::Failed, Some(failure), None, step) {
            self.set_phase(task, Phase::Done);
        }
    }

    fn set_phase(&mut self, task: &str, phase: Phase) {
        if let Some(entry) = self.tasks.get_mut(task) {
            entry.phase = phase;
        }
    }

    /// Apply a status change if it keeps the lifecycle monotonic; regressions
    /// are logged and dropped.
    fn transition(
        &mut self,
        task: &str,
        next: TaskStatus,
        failure: Option<TaskFailure>,
        skip_reason: Option<SkipReason>,
        step: &mut SchedulerStep,
    ) -> bool {
        let Some(entry) = self.tasks.get_mut(task) else {
            warn!(task = %task, "status change for unknown task; ignoring");
            return false;
        };

        if !entry.status.can_advance_to(next) {
            warn!(
                task = %task,
                from = %entry.status,
                to = %next,
                "ignoring non-monotonic status change"
            );
            return false;
        }

        debug!(task = %task, from = %entry.status, to = %next, "status change");
        entry.status = next;
        if failure.is_some() {
            entry.failure = failure.clone();
        }
        if skip_reason.is_some() {
            entry.skip_reason = skip_reason;
        }

        step.transitions.push(StatusChange {
            task: task.to_string(),
            status: next,
            failure,
            skip_reason,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use chrono::Utc;

    use crate::catalog::ToolCatalog;
    use crate::provision::BinarySource;
    use crate::types::InputKind;

    fn plan(names: &[&str]) -> Vec<PlannedTask> {
        let catalog = ToolCatalog::builtin().unwrap();
        let def = catalog.get("PECmd").unwrap();
        names
            .iter()
            .map(|n| PlannedTask {
                instance: Arc::new(TaskInstance {
                    name: n.to_string(),
                    definition: Arc::clone(&def),
                    triage_root: Some(PathBuf::from("/c")),
                    memory_image: None,
                    output_dir: PathBuf::from("/out").join(n),
                    modules: Vec::new(),
                    timestamp: "t".to_string(),
                }),
                skip: None,
            })
            .collect()
    }

    fn binary(name: &str) -> ProvisionedBinary {
        ProvisionedBinary {
            tool: name.to_string(),
            executable: PathBuf::from("/tools").join(name),
            version: "1".to_string(),
            provisioned_at: Utc::now(),
            source: BinarySource::Operator,
        }
    }

    fn names(tasks: &[Arc<TaskInstance>]) -> Vec<&str> {
        tasks.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn provisioning_ceiling_does_not_block_running() {
        let mut s = Scheduler::new(
            plan(&["A", "B", "C"]),
            SchedulerLimits {
                max_running: 2,
                max_provisioning: 1,
            },
        );

        let step = s.start();
        assert_eq!(names(&step.provision), vec!["A"]);

        let step = s.on_provisioned("A", Ok(binary("A")));
        assert_eq!(step.run.len(), 1);
        assert_eq!(names(&step.provision), vec!["B"]);
        assert_eq!(s.status_of("A"), Some(TaskStatus::Running));
        assert_eq!(s.running_count(), 1);
        assert_eq!(s.provisioning_count(), 1);
    }

    #[test]
    fn provisioned_tasks_queue_fifo_for_run_slots() {
        let mut s = Scheduler::new(
            plan(&["A", "B", "C"]),
            SchedulerLimits {
                max_running: 1,
                max_provisioning: 3,
            },
        );
        s.start();
        s.on_provisioned("C", Ok(binary("C")));
        let step = s.on_provisioned("B", Ok(binary("B")));
        assert!(step.run.is_empty());
        assert_eq!(s.status_of("B"), Some(TaskStatus::Provisioning));

        let step = s.on_completed("C", Ok(()));
        assert_eq!(step.run[0].task.name, "B");
    }

    #[test]
    fn failure_does_not_touch_siblings() {
        let mut s = Scheduler::new(plan(&["A", "B"]), SchedulerLimits::default());
        s.start();
        s.on_provisioned("A", Err(ProvisionError::Unavailable("gone".into())));
        assert_eq!(s.status_of("A"), Some(TaskStatus::Failed));

        s.on_provisioned("B", Ok(binary("B")));
        let step = s.on_completed("B", Ok(()));
        assert!(step.batch_finished);
        assert_eq!(s.outcome(), BatchOutcome::PartialFailure);
    }

    #[test]
    fn cancel_skips_waiting_and_lets_running_finish() {
        let mut s = Scheduler::new(
            plan(&["A", "B", "C"]),
            SchedulerLimits {
                max_running: 1,
                max_provisioning: 1,
            },
        );
        s.start();
        s.on_provisioned("A", Ok(binary("A")));
        assert_eq!(s.status_of("B"), Some(TaskStatus::Provisioning));

        let step = s.cancel();
        assert_eq!(step.transitions.len(), 1);
        assert_eq!(step.transitions[0].task, "C");
        assert_eq!(step.transitions[0].skip_reason, Some(SkipReason::Cancelled));

        let step = s.on_provisioned("B", Ok(binary("B")));
        assert!(step.run.is_empty());
        assert_eq!(s.status_of("B"), Some(TaskStatus::Skipped));

        let step = s.on_completed("A", Ok(()));
        assert!(step.batch_finished);
        assert_eq!(s.status_of("A"), Some(TaskStatus::Succeeded));
        assert_eq!(s.outcome(), BatchOutcome::Succeeded);
    }

    #[test]
    fn pre_skipped_tasks_finish_immediately() {
        let mut p = plan(&["Vol"]);
        p[0].skip = Some(SkipReason::MissingInput(InputKind::MemoryImage));
        let mut s = Scheduler::new(p, SchedulerLimits::default());

        let step = s.start();
        assert!(step.batch_finished);
        assert!(step.provision.is_empty());
        assert_eq!(s.status_of("Vol"), Some(TaskStatus::Skipped));
    }

    #[test]
    fn stale_events_are_ignored() {
        let mut s = Scheduler::new(plan(&["A"]), SchedulerLimits::default());
        s.start();
        let step = s.on_completed("A", Ok(()));
        assert!(step.transitions.is_empty());
        assert_eq!(s.status_of("A"), Some(TaskStatus::Provisioning));

        let step = s.on_provisioned("nope", Ok(binary("nope")));
        assert!(step.transitions.is_empty());
    }
}
