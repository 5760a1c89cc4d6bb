use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::str::FromStr;

use serde::Deserialize;

/// Canonical task name type used throughout the crate.
pub type TaskName = String;

/// Boxed, sendable future used at the trait seams (tasks, services).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lifecycle phase a task can reach.
///
/// Phases are totally ordered; a task's status is the highest phase it has
/// completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Uninitialized,
    Init,
    Setup,
    Start,
    Stop,
}

impl Phase {
    /// Teardown phases walk the dependency graph backwards.
    pub fn is_teardown(self) -> bool {
        self >= Phase::Stop
    }

    /// Index of the phase in per-phase tables; `None` for `Uninitialized`.
    pub(crate) fn slot(self) -> Option<usize> {
        match self {
            Phase::Uninitialized => None,
            Phase::Init => Some(0),
            Phase::Setup => Some(1),
            Phase::Start => Some(2),
            Phase::Stop => Some(3),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Init => "init",
            Phase::Setup => "setup",
            Phase::Start => "start",
            Phase::Stop => "stop",
        };
        f.write_str(s)
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "uninitialized" | "none" => Ok(Phase::Uninitialized),
            "init" => Ok(Phase::Init),
            "setup" => Ok(Phase::Setup),
            "start" => Ok(Phase::Start),
            "stop" => Ok(Phase::Stop),
            other => Err(format!(
                "invalid phase: {other} (expected init, setup, start or stop)"
            )),
        }
    }
}

/// Which phases of a task may run on the pooled lane.
///
/// Anything not marked pooled goes through the single-worker serialized lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lanes {
    pooled: [bool; 4],
}

impl Lanes {
    /// Every phase on the serialized lane.
    pub fn serial() -> Self {
        Self::default()
    }

    /// Every phase on the pooled lane.
    pub fn pooled() -> Self {
        Self { pooled: [true; 4] }
    }

    pub fn with_pooled(mut self, phase: Phase) -> Self {
        if let Some(i) = phase.slot() {
            self.pooled[i] = true;
        }
        self
    }

    pub fn is_pooled(&self, phase: Phase) -> bool {
        phase.slot().map(|i| self.pooled[i]).unwrap_or(false)
    }
}

/// Concurrency setting for a scheduler run.
///
/// Mirrors the integer form used in config files and on the CLI:
/// - `0`: fully serialized, everything runs on the calling task
/// - `n > 0`: at most `n` pooled workers
/// - negative: one worker per task, capped to the hardware-thread hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "i64")]
pub enum Concurrency {
    Serial,
    Limited(NonZeroUsize),
    Unbounded,
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency::Unbounded
    }
}

impl From<i64> for Concurrency {
    fn from(value: i64) -> Self {
        if value < 0 {
            return Concurrency::Unbounded;
        }
        match usize::try_from(value).ok().and_then(NonZeroUsize::new) {
            Some(n) => Concurrency::Limited(n),
            None => Concurrency::Serial,
        }
    }
}

impl Concurrency {
    pub fn is_serial(&self) -> bool {
        matches!(self, Concurrency::Serial)
    }

    /// Number of pooled workers to spawn for a run over `task_count` tasks.
    ///
    /// Always at least 1 so a pooled task can never starve.
    pub fn worker_count(&self, task_count: usize) -> usize {
        let limit = match self {
            Concurrency::Serial => 1,
            Concurrency::Limited(n) => n.get().min(task_count),
            Concurrency::Unbounded => {
                let hint = std::thread::available_parallelism()
                    .map(NonZeroUsize::get)
                    .unwrap_or(1);
                task_count.min(hint)
            }
        };
        limit.max(1)
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concurrency::Serial => f.write_str("serial"),
            Concurrency::Limited(n) => write!(f, "limited({n})"),
            Concurrency::Unbounded => f.write_str("unbounded"),
        }
    }
}
