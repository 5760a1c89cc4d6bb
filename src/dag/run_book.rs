// src/dag/run_book.rs

//! Per-run bookkeeping shared by the dispatch and completion sides of a
//! scheduler run.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::task::TaskRef;
use crate::types::TaskName;

/// Which tasks are running, finished or given up on in one scheduler run.
///
/// Membership checks vastly outnumber updates, hence the reader/writer locks.
/// The ordered `finished_list` is what `Scheduler::release` hands back.
#[derive(Default)]
pub struct RunBook {
    running: RwLock<HashSet<TaskName>>,
    finished: RwLock<HashSet<TaskName>>,
    ignored: RwLock<HashSet<TaskName>>,
    abandoned: RwLock<HashSet<TaskName>>,
    finished_list: Mutex<Vec<TaskRef>>,
}

impl RunBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    pub fn is_finished(&self, name: &str) -> bool {
        self.finished
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    /// Failed, or skipped because a dependency failed. Only teardown runs
    /// keep going past such tasks.
    pub fn is_abandoned(&self, name: &str) -> bool {
        self.abandoned
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    /// Finished or ignored: either way, followers need not wait for it.
    pub fn is_settled(&self, name: &str) -> bool {
        self.is_finished(name) || self.is_ignored(name)
    }

    /// Claim `name` for dispatch.
    ///
    /// Returns `false` if it was already claimed; exactly one caller wins.
    pub fn try_mark_running(&self, name: &str) -> bool {
        if self.is_running(name) {
            return false;
        }
        self.running
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string())
    }

    /// Record a completed task. Returns `false` if it was already recorded.
    pub fn mark_finished(&self, task: TaskRef) -> bool {
        let inserted = self
            .finished
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.name().to_string());
        if inserted {
            debug!(task = %task.name(), "marked finished");
            self.finished_list
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(task);
        }
        inserted
    }

    pub fn mark_ignored(&self, name: &str) {
        self.ignored
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    pub fn mark_abandoned(&self, name: &str) {
        self.abandoned
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    pub fn finished_count(&self) -> usize {
        self.finished_list
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Snapshot of finished tasks, in completion order.
    pub fn finished_tasks(&self) -> Vec<TaskRef> {
        self.finished_list
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
