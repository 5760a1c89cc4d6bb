use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::dag::run_book::RunBook;
use crate::errors::{BootdagError, Result, wrap_common_error};
use crate::exec::pool::{Lane, WorkerPool, outcome_channels};
use crate::task::TaskRef;
use crate::types::{BoxFuture, Concurrency, Phase, TaskName};

/// Lifecycle of a single scheduler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug)]
struct Outcome {
    status: RunStatus,
    error: Option<BootdagError>,
}

/// The two lanes of a pooled run.
struct Lanes {
    serialized: WorkerPool,
    pooled: WorkerPool,
}

/// Drives one phase across a fixed set of tasks.
///
/// It is responsible for:
/// - deciding when a task is eligible (its phase dependencies finished)
/// - dispatching eligible tasks to the serialized or pooled lane
/// - scheduling followers when a task finishes
/// - surfacing the first failure and cancelling everything else
///
/// Teardown is the exception: a failed Stop hook only holds back the tasks
/// that must stop after it. Everything else still stops, and the first
/// failure is returned once the run has settled.
///
/// With [`Concurrency::Serial`] there are no lanes at all: dependencies are
/// resolved depth-first on the calling task, in task-list order.
///
/// A scheduler is built for one run. Dependencies that are not part of its
/// task set are treated as satisfied.
pub struct Scheduler {
    phase: Phase,
    concurrency: Concurrency,
    tasks: Vec<TaskRef>,
    index: HashMap<TaskName, TaskRef>,
    token: CancellationToken,
    book: RunBook,
    outcome: Mutex<Outcome>,
    /// First hook failure of a teardown run.
    failure: Mutex<Option<BootdagError>>,
    /// Completions that arrive after the producer loop has exited.
    late: Mutex<Option<mpsc::Receiver<TaskRef>>>,
    tracker: TaskTracker,
}

impl Scheduler {
    /// Build a scheduler for `phase` whose cancellation scope derives from
    /// `parent`.
    pub fn new(
        parent: &CancellationToken,
        tasks: Vec<TaskRef>,
        phase: Phase,
        concurrency: Concurrency,
    ) -> Self {
        let index = tasks
            .iter()
            .map(|t| (t.name().to_string(), TaskRef::clone(t)))
            .collect();

        Self {
            phase,
            concurrency,
            tasks,
            index,
            token: parent.child_token(),
            book: RunBook::new(),
            outcome: Mutex::new(Outcome {
                status: RunStatus::Idle,
                error: None,
            }),
            failure: Mutex::new(None),
            late: Mutex::new(None),
            tracker: TaskTracker::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> RunStatus {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    /// Snapshot of the tasks finished so far, in completion order.
    pub fn finished(&self) -> Vec<TaskRef> {
        self.book.finished_tasks()
    }

    /// Treat `task` as done without running it.
    ///
    /// Its followers stop waiting on it and it does not count towards
    /// completion of the run.
    pub fn set_ignore(&self, task: &str) {
        debug!(task = %task, phase = %self.phase, "task ignored for this run");
        self.book.mark_ignored(task);
    }

    /// Request cooperative cancellation.
    ///
    /// In-flight hooks are left to finish; nothing new is dispatched. Does
    /// nothing unless the run is in progress.
    pub fn interrupt(&self) {
        let status = self.status();
        if status == RunStatus::Running {
            info!(phase = %self.phase, "interrupting scheduler run");
            self.token.cancel();
        } else {
            trace!(phase = %self.phase, ?status, "interrupt ignored");
        }
    }

    /// Wait until the run and all of its workers have quiesced, then return
    /// the finished tasks and the terminal error (if any).
    ///
    /// Hooks that were still in flight when the run ended (interrupt, timeout
    /// or a failure elsewhere) and then succeeded are included.
    pub async fn release(&self) -> (Vec<TaskRef>, Option<BootdagError>) {
        self.tracker.close();
        self.tracker.wait().await;

        let late = self.late.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut late) = late {
            while let Ok(task) = late.try_recv() {
                debug!(task = %task.name(), phase = %self.phase, "hook finished after the run ended");
                self.book.mark_finished(task);
            }
        }

        let error = self
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .error
            .clone();
        (self.book.finished_tasks(), error)
    }

    /// Drive every task through the phase.
    ///
    /// Returns the first hook error, `Cancelled` if the scope fired first, or
    /// `Ok(())` once every task finished. A second call returns the first
    /// call's result without running anything.
    pub async fn run(&self) -> Result<()> {
        let _tracked = self.tracker.token();

        {
            let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
            if outcome.status != RunStatus::Idle {
                warn!(phase = %self.phase, status = ?outcome.status, "scheduler already ran");
                return match &outcome.error {
                    Some(err) => Err(err.clone()),
                    None => Ok(()),
                };
            }
            outcome.status = RunStatus::Running;
        }

        info!(
            phase = %self.phase,
            tasks = self.tasks.len(),
            concurrency = %self.concurrency,
            "scheduler run started"
        );

        let res = if self.concurrency.is_serial() {
            let total = self.pending_total();
            self.run_serial(self.tasks.clone())
                .await
                .and_then(|()| self.settle(total))
        } else {
            self.run_pooled().await
        };

        self.finish(&res);
        res
    }

    fn finish(&self, res: &Result<()>) {
        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        match res {
            Ok(()) => {
                outcome.status = RunStatus::Completed;
                info!(
                    phase = %self.phase,
                    finished = self.book.finished_count(),
                    "scheduler run completed"
                );
            }
            Err(err) => {
                // Stop dispatch and release workers still waiting for requests.
                self.token.cancel();
                outcome.status = if err.is_cancelled() {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Failed
                };
                outcome.error = Some(err.clone());
                warn!(
                    phase = %self.phase,
                    finished = self.book.finished_count(),
                    error = %err,
                    "scheduler run ended with error"
                );
            }
        }
    }

    fn cancelled(&self) -> BootdagError {
        BootdagError::Cancelled { phase: self.phase }
    }

    /// Record a failed teardown hook and keep going. Tasks that must stop
    /// after `task` never become ready.
    fn abandon(&self, task: &TaskRef, err: BootdagError) {
        warn!(
            task = %task.name(),
            phase = %self.phase,
            error = %err,
            held_back = ?task.followers_for(self.phase),
            "task failed; continuing with unaffected tasks"
        );
        self.book.mark_abandoned(task.name());
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            *failure = Some(err);
        }
    }

    /// Result of a run with nothing left in flight.
    fn settle(&self, total: usize) -> Result<()> {
        let failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(err) = failure {
            return Err(err);
        }
        let finished = self.book.finished_count();
        if finished < total {
            return Err(BootdagError::DagCycle(format!(
                "{} of {} tasks never became ready for {}",
                total - finished,
                total,
                self.phase
            )));
        }
        Ok(())
    }

    /// Number of tasks that must finish for the run to complete.
    fn pending_total(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| !self.book.is_ignored(t.name()))
            .count()
    }

    /// `Ok(())` if every phase dependency of `task` that is part of this run
    /// has finished (or is ignored).
    fn check_dependencies_ready(&self, task: &TaskRef) -> Result<()> {
        for dep in task.dependencies_for(self.phase) {
            if !self.index.contains_key(&dep) {
                trace!(task = %task.name(), dependency = %dep, "dependency outside of this run");
                continue;
            }
            if !self.book.is_settled(&dep) {
                return Err(BootdagError::NotReady {
                    task: task.name().to_string(),
                    dependency: dep,
                });
            }
        }
        Ok(())
    }

    fn resolve(&self, names: &[TaskName]) -> Vec<TaskRef> {
        names
            .iter()
            .filter_map(|name| self.index.get(name).cloned())
            .collect()
    }

    /// Partition the eligible `candidates` into (serialized, pooled), in
    /// discovery order, claiming each for dispatch.
    fn scan(&self, candidates: &[TaskRef]) -> (Vec<TaskRef>, Vec<TaskRef>) {
        let mut serialized = Vec::new();
        let mut pooled = Vec::new();

        for task in candidates {
            let name = task.name();
            if self.book.is_settled(name) || self.book.is_abandoned(name) {
                continue;
            }
            if let Err(err) = self.check_dependencies_ready(task) {
                trace!(%err, "skip during scan");
                continue;
            }
            if !self.book.try_mark_running(name) {
                continue;
            }

            if task.is_async(self.phase) {
                debug!(task = %name, phase = %self.phase, "push to pooled lane");
                pooled.push(TaskRef::clone(task));
            } else {
                debug!(task = %name, phase = %self.phase, "push to serialized lane");
                serialized.push(TaskRef::clone(task));
            }
        }

        (serialized, pooled)
    }

    /// Dispatch whatever became eligible; returns how many tasks were sent.
    async fn dispatch_ready(&self, candidates: &[TaskRef], lanes: &Lanes) -> Result<usize> {
        let (serialized, pooled) = self.scan(candidates);
        let sent = serialized.len() + pooled.len();
        for task in serialized {
            lanes.serialized.submit(task, self.phase).await?;
        }
        for task in pooled {
            lanes.pooled.submit(task, self.phase).await?;
        }
        Ok(sent)
    }

    /// Producer side of the pipeline: dispatch, then react to completions
    /// until every task finished or something went wrong.
    async fn run_pooled(&self) -> Result<()> {
        let total = self.pending_total();
        if total == 0 {
            return Ok(());
        }

        let workers = self.concurrency.worker_count(total);
        let (reporter, mut outcomes) = outcome_channels(total);
        let lanes = Lanes {
            serialized: WorkerPool::new(
                Lane::Serialized,
                self.phase,
                total,
                1,
                self.token.clone(),
                reporter.clone(),
                &self.tracker,
            ),
            pooled: WorkerPool::new(
                Lane::Pooled,
                self.phase,
                total,
                workers,
                self.token.clone(),
                reporter,
                &self.tracker,
            ),
        };

        let mut in_flight = self.dispatch_ready(&self.tasks, &lanes).await?;

        let res = loop {
            if in_flight == 0 {
                break self.settle(total);
            }

            tokio::select! {
                biased;
                _ = self.token.cancelled() => break Err(self.cancelled()),
                Some((task, err)) = outcomes.failed.recv() => {
                    in_flight -= 1;
                    if !self.phase.is_teardown() {
                        break Err(err);
                    }
                    self.abandon(&task, err);
                }
                Some(task) = outcomes.finished.recv() => {
                    in_flight -= 1;
                    let followers = self.resolve(&task.followers_for(self.phase));
                    self.book.mark_finished(task);
                    match self.dispatch_ready(&followers, &lanes).await {
                        Ok(sent) => in_flight += sent,
                        Err(err) => break Err(err),
                    }
                }
                else => break Err(self.cancelled()),
            }
        };

        lanes.serialized.close();
        lanes.pooled.close();
        *self.late.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcomes.finished);
        res
    }

    /// Depth-first, single-task execution used for `Concurrency::Serial`.
    fn run_serial<'a>(&'a self, tasks: Vec<TaskRef>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for task in tasks {
                if self.token.is_cancelled() {
                    return Err(self.cancelled());
                }

                let name = task.name().to_string();
                if self.book.is_settled(&name) || self.book.is_abandoned(&name) {
                    trace!(task = %name, "already handled; skip");
                    continue;
                }
                if !self.book.try_mark_running(&name) {
                    // Claimed but not finished: we are inside its own
                    // dependency chain.
                    return Err(BootdagError::DagCycle(format!(
                        "cycle detected while running {} for task '{}'",
                        self.phase, name
                    )));
                }

                let deps = self.resolve(&task.dependencies_for(self.phase));
                trace!(task = %name, dependencies = deps.len(), "inspecting dependencies");
                self.run_serial(deps.clone()).await?;

                if let Some(dep) = deps.iter().find(|d| self.book.is_abandoned(d.name())) {
                    warn!(task = %name, phase = %self.phase, dependency = %dep.name(), "held back by a failed task");
                    self.book.mark_abandoned(&name);
                    continue;
                }

                debug!(task = %name, phase = %self.phase, "running task inline");
                let res = task.run(self.token.child_token(), self.phase).await;
                if let Err(err) = wrap_common_error(res) {
                    if self.phase.is_teardown() {
                        self.abandon(&task, err);
                        continue;
                    }
                    warn!(task = %name, phase = %self.phase, error = %err, "task failed");
                    return Err(err);
                }
                self.book.mark_finished(task);
            }
            Ok(())
        })
    }
}
