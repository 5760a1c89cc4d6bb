// src/errors.rs

//! Crate-wide error type and helpers.
//!
//! `BootdagError` is `Clone`: a scheduler hands its terminal error both to the
//! caller of `run()` and to whoever later calls `release()`. Non-clonable
//! sources are kept behind an `Arc`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::types::{Phase, TaskName};

#[derive(Error, Debug, Clone)]
pub enum BootdagError {
    /// The task already reached (or passed) the requested phase.
    ///
    /// Never fatal: the scheduler treats it as a finished task.
    #[error("task '{task}' has already run {phase}")]
    AlreadyRan { task: TaskName, phase: Phase },

    /// A dependency has not finished the phase yet. Only used while scanning.
    #[error("task '{task}' is not ready: waiting on '{dependency}'")]
    NotReady {
        task: TaskName,
        dependency: TaskName,
    },

    /// The task's own phase hook failed.
    #[error("task '{task}' failed to {phase}: {source}")]
    Callback {
        task: TaskName,
        phase: Phase,
        #[source]
        source: HookError,
    },

    /// The run's cancellation scope fired before the phase completed.
    #[error("{phase} phase was cancelled")]
    Cancelled { phase: Phase },

    #[error("{phase} phase did not complete within {after:?}")]
    Timeout { phase: Phase, after: Duration },

    #[error("cannot {phase}: {required} has not been executed")]
    PhaseNotReached { phase: Phase, required: Phase },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[source] Arc<std::io::Error>),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cycle detected in dependency graph: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[source] Arc<toml::de::Error>),

    #[error("{0:#}")]
    Other(Arc<anyhow::Error>),
}

impl BootdagError {
    /// Errors the scheduler swallows instead of surfacing to the caller.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            BootdagError::AlreadyRan { .. } | BootdagError::NotReady { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BootdagError::Cancelled { .. })
    }
}

impl From<std::io::Error> for BootdagError {
    fn from(err: std::io::Error) -> Self {
        BootdagError::IoError(Arc::new(err))
    }
}

impl From<toml::de::Error> for BootdagError {
    fn from(err: toml::de::Error) -> Self {
        BootdagError::TomlError(Arc::new(err))
    }
}

impl From<anyhow::Error> for BootdagError {
    fn from(err: anyhow::Error) -> Self {
        BootdagError::Other(Arc::new(err))
    }
}

/// Error returned by a service hook, shareable between the scheduler's
/// `run()` and `release()` results.
#[derive(Debug, Clone)]
pub struct HookError(Arc<anyhow::Error>);

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for HookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&**self.0)
    }
}

impl From<anyhow::Error> for HookError {
    fn from(err: anyhow::Error) -> Self {
        HookError(Arc::new(err))
    }
}

/// Drop benign outcomes, keep real failures.
pub fn wrap_common_error(res: Result<()>) -> Result<()> {
    match res {
        Err(err) if err.is_benign() => Ok(()),
        other => other,
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BootdagError>;
