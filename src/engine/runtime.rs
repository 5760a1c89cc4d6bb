// src/engine/runtime.rs

//! Glue between a validated config file and the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ConfigFile;
use crate::dag::phase_order;
use crate::engine::{Bootstrap, BootstrapConfig};
use crate::errors::{BootdagError, Result};
use crate::exec::CommandService;
use crate::task::{Component, TaskRef};
use crate::types::{Phase, TaskName};

/// Register one [`CommandService`] per `[task.<name>]` section, in name
/// order. Dependencies are wired during Init.
pub fn bootstrap_from_config(cfg: &ConfigFile, options: BootstrapConfig) -> Result<Bootstrap> {
    let mut bootstrap = Bootstrap::new(options);
    for (name, task) in cfg.task.iter() {
        let service = CommandService::from_config(name, task)?;
        bootstrap.add_with_key(service, name.clone())?;
    }
    Ok(bootstrap)
}

/// Task order of every scheduled phase, computed without running any hook.
pub fn plan(cfg: &ConfigFile) -> Result<Vec<(Phase, Vec<TaskName>)>> {
    let mut components: HashMap<&str, Arc<Component>> = HashMap::new();
    let mut tasks: Vec<TaskRef> = Vec::new();

    for (name, task) in cfg.task.iter() {
        let service = CommandService::from_config(name, task)?;
        let component = Arc::new(Component::new(
            Arc::new(service),
            name.clone(),
            Phase::Uninitialized,
        ));
        tasks.push(Arc::clone(&component) as TaskRef);
        components.insert(name.as_str(), component);
    }

    for (name, task) in cfg.task.iter() {
        let Some(component) = components.get(name.as_str()) else {
            continue;
        };
        for dep in task.after.iter() {
            let dependency = components
                .get(dep.as_str())
                .ok_or_else(|| BootdagError::TaskNotFound(dep.clone()))?;
            component.depend_on(dependency)?;
        }
    }

    [Phase::Setup, Phase::Start, Phase::Stop]
        .into_iter()
        .map(|phase| Ok((phase, phase_order(&tasks, phase)?)))
        .collect()
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl-C"),
        Err(e) => {
            warn!(error = %e, "failed to listen for Ctrl-C; waiting forever");
            std::future::pending::<()>().await;
        }
    }
}
