// src/exec/mod.rs

//! Execution layer.
//!
//! - [`pool`] holds the worker pools a scheduler run dispatches to.
//! - [`command`] provides [`CommandService`], a service whose phases are
//!   shell commands.
//! - [`long_lived`] contains readiness detection (`ready_on_stdout`,
//!   `ready_after`) for start commands that keep running.

pub mod command;
pub mod long_lived;
pub mod pool;

pub use command::{CommandService, PhaseCommands, run_command};
pub use long_lived::{Readiness, parse_duration};
