#![allow(dead_code)]

use std::sync::Arc;

use bootdag::dag::Scheduler;
use bootdag::task::{Component, Task};
use bootdag::types::{Concurrency, Phase};
use tokio_util::sync::CancellationToken;

pub use bootdag_test_utils::mock::{EventKind, ExecutionLog, MockService, task_refs, wired};
pub use bootdag_test_utils::{init_tracing, ms, with_timeout};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Scheduler for `phase` over `components` under a fresh root token.
pub fn scheduler(components: &[Arc<Component>], phase: Phase, concurrency: i64) -> Scheduler {
    Scheduler::new(
        &CancellationToken::new(),
        task_refs(components),
        phase,
        Concurrency::from(concurrency),
    )
}

/// Names of the tasks a scheduler reports as finished, in completion order.
pub fn finished_names(scheduler: &Scheduler) -> Vec<String> {
    scheduler
        .finished()
        .iter()
        .map(|t| t.name().to_string())
        .collect()
}
