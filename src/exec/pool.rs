// src/exec/pool.rs

//! Bounded worker pool used by the scheduler's two lanes.
//!
//! A pool is a shared request queue plus `worker_count` Tokio tasks pulling
//! from it. Each worker runs one task phase at a time and reports either on
//! the shared *finished* queue or on the shared *failed* queue (together with
//! the task that failed), then loops.
//!
//! The serialized lane is simply a pool with a single worker.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::errors::{BootdagError, Result, wrap_common_error};
use crate::task::TaskRef;
use crate::types::Phase;

/// Sending half of the result/error queues, shared by every worker.
#[derive(Clone)]
pub struct Reporter {
    finished: mpsc::Sender<TaskRef>,
    failed: mpsc::Sender<(TaskRef, BootdagError)>,
}

/// Receiving half of the result/error queues, owned by the scheduler.
pub struct Outcomes {
    pub finished: mpsc::Receiver<TaskRef>,
    pub failed: mpsc::Receiver<(TaskRef, BootdagError)>,
}

/// Create the result/error queues.
///
/// `capacity` should be the number of tasks in the run: every task reports at
/// most once, so workers never block on a full queue.
pub fn outcome_channels(capacity: usize) -> (Reporter, Outcomes) {
    let capacity = capacity.max(1);
    let (finished_tx, finished_rx) = mpsc::channel(capacity);
    let (failed_tx, failed_rx) = mpsc::channel(capacity);
    (
        Reporter {
            finished: finished_tx,
            failed: failed_tx,
        },
        Outcomes {
            finished: finished_rx,
            failed: failed_rx,
        },
    )
}

/// Which lane a pool serves. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Serialized,
    Pooled,
}

/// Handle to a running worker pool.
///
/// Dropping (or [`close`](Self::close)-ing) the handle closes the request
/// queue; workers exit once it is drained or the token fires. Workers are
/// spawned on the caller's [`TaskTracker`] so the owner can wait for them.
pub struct WorkerPool {
    lane: Lane,
    tx: mpsc::Sender<TaskRef>,
    token: CancellationToken,
}

/// Everything a worker needs; cloned into every worker task.
#[derive(Clone)]
struct WorkerCtx {
    lane: Lane,
    phase: Phase,
    token: CancellationToken,
    requests: Arc<Mutex<mpsc::Receiver<TaskRef>>>,
    reporter: Reporter,
}

impl WorkerPool {
    pub fn new(
        lane: Lane,
        phase: Phase,
        buffer_size: usize,
        worker_count: usize,
        token: CancellationToken,
        reporter: Reporter,
        tracker: &TaskTracker,
    ) -> Self {
        let workers = worker_count.max(1);
        let (tx, rx) = mpsc::channel::<TaskRef>(buffer_size.max(1));

        let ctx = WorkerCtx {
            lane,
            phase,
            token: token.clone(),
            requests: Arc::new(Mutex::new(rx)),
            reporter,
        };

        for id in 0..workers {
            tracker.spawn(worker_loop(id, ctx.clone()));
        }
        debug!(?lane, %phase, workers, buffer_size, "worker pool started");

        Self { lane, tx, token }
    }

    /// Queue a task for execution.
    ///
    /// Fails with `Cancelled` once the pool's scope has fired or every worker
    /// has exited.
    pub async fn submit(&self, task: TaskRef, phase: Phase) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(BootdagError::Cancelled { phase }),
            sent = self.tx.send(task) => sent.map_err(|_| BootdagError::Cancelled { phase }),
        }
    }

    /// Stop accepting requests. Already queued tasks still run unless the
    /// token fires first.
    pub fn close(self) {
        drop(self.tx);
        debug!(lane = ?self.lane, "worker pool closed");
    }
}

async fn worker_loop(id: usize, ctx: WorkerCtx) {
    loop {
        let next = {
            let mut requests = ctx.requests.lock().await;
            tokio::select! {
                biased;
                _ = ctx.token.cancelled() => None,
                task = requests.recv() => task,
            }
        };

        let Some(task) = next else {
            break;
        };
        execute(&ctx, task).await;
    }
    debug!(lane = ?ctx.lane, worker = id, "worker exited");
}

async fn execute(ctx: &WorkerCtx, task: TaskRef) {
    debug!(task = %task.name(), phase = %ctx.phase, lane = ?ctx.lane, "running task");

    let res = task.run(ctx.token.child_token(), ctx.phase).await;
    match wrap_common_error(res) {
        Ok(()) => {
            // The scheduler may already be gone after an error; nothing to do then.
            let _ = ctx.reporter.finished.send(task).await;
        }
        Err(err) => {
            warn!(task = %task.name(), phase = %ctx.phase, error = %err, "task failed");
            let _ = ctx.reporter.failed.send((task, err)).await;
        }
    }
}
