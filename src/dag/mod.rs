// src/dag/mod.rs

//! Dependency graph and phase scheduling.
//!
//! - [`graph`] holds the per-task edge sets and the acyclicity check.
//! - [`scheduler`] drives one phase across a task set.
//! - [`run_book`] tracks running/finished tasks within one scheduler run.

pub mod graph;
pub mod run_book;
pub mod scheduler;

pub use graph::{Edges, check_acyclic, phase_order};
pub use run_book::RunBook;
pub use scheduler::{RunStatus, Scheduler};
