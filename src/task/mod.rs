// src/task/mod.rs

//! Tasks and their lifecycle.
//!
//! - [`Task`] is the only interface the scheduler needs. Anything that can
//!   report a name, its phase dependencies and run a phase can be scheduled.
//! - [`service`] defines the user-facing [`Service`] trait (the hooks) and the
//!   dependency declarations returned from `init`.
//! - [`component`] wraps a `Service` into a `Task`: status tracking, per-phase
//!   guards, edges.

pub mod component;
pub mod service;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::types::{BoxFuture, Phase, TaskName};

pub use component::Component;
pub use service::{Dependency, PhaseContext, Service, Started};

/// Shared handle to a schedulable task.
pub type TaskRef = Arc<dyn Task>;

/// Contract between the scheduler and a managed component.
pub trait Task: Send + Sync {
    /// Stable unique identifier, used as the key of all bookkeeping maps.
    fn name(&self) -> &str;

    /// Execute `phase`.
    ///
    /// Must return [`BootdagError::AlreadyRan`](crate::errors::BootdagError::AlreadyRan)
    /// when the task already reached or passed `phase`, and should return
    /// promptly.
    fn run(&self, token: CancellationToken, phase: Phase) -> BoxFuture<'_, Result<()>>;

    /// Whether `phase` may run on the pooled lane.
    fn is_async(&self, phase: Phase) -> bool;

    /// Tasks that must finish `phase` before this one may start it.
    fn dependencies_for(&self, phase: Phase) -> Vec<TaskName>;

    /// Tasks that wait on this one for `phase`.
    fn followers_for(&self, phase: Phase) -> Vec<TaskName>;
}
