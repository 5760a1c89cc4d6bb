// src/engine/mod.rs

//! Orchestration engine.
//!
//! [`bootstrap`] owns the task graph and sequences the lifecycle phases, one
//! scheduler per phase. [`runtime`] builds a bootstrap from a config file and
//! provides the shutdown signal used by the binary.

pub mod bootstrap;
pub mod runtime;

pub use bootstrap::{Bootstrap, BootstrapConfig};
pub use runtime::{bootstrap_from_config, plan, shutdown_signal};
