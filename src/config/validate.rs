// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;

use crate::config::model::{ConfigFile, RawConfigFile, TaskConfig};
use crate::errors::{BootdagError, Result};
use crate::exec::long_lived::parse_duration;
use crate::types::Phase;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = BootdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.task))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    for (name, task) in cfg.task.iter() {
        validate_task(name, task)?;
    }
    validate_task_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(BootdagError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn check_duration(field: &str, value: Option<&str>) -> Result<()> {
    if let Some(value) = value {
        parse_duration(value)
            .map_err(|e| BootdagError::ConfigError(format!("{field}: {e}")))?;
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    check_duration(
        "[config].phase_timeout",
        cfg.config.phase_timeout.as_deref(),
    )?;
    check_duration(
        "[config].shutdown_timeout",
        cfg.config.shutdown_timeout.as_deref(),
    )?;
    Ok(())
}

fn validate_task(name: &str, task: &TaskConfig) -> Result<()> {
    if name.trim().is_empty() {
        return Err(BootdagError::ConfigError(
            "task names must not be empty".to_string(),
        ));
    }

    for phase in task.pooled.iter() {
        match phase.parse::<Phase>() {
            Ok(Phase::Uninitialized) | Err(_) => {
                return Err(BootdagError::ConfigError(format!(
                    "task '{}' lists unknown phase '{}' in `async`",
                    name, phase
                )));
            }
            Ok(_) => {}
        }
    }

    check_duration(
        &format!("[task.{name}].ready_after"),
        task.ready_after.as_deref(),
    )?;

    if let Some(pattern) = &task.ready_on_stdout {
        Regex::new(pattern).map_err(|e| {
            BootdagError::ConfigError(format!(
                "task '{}' has invalid ready_on_stdout regex: {}",
                name, e
            ))
        })?;
    }

    if task.long_lived {
        if task.start.is_none() {
            return Err(BootdagError::ConfigError(format!(
                "long-lived task '{}' must define a `start` command",
                name
            )));
        }
        if task.ready_on_stdout.is_none() && task.ready_after.is_none() {
            return Err(BootdagError::ConfigError(format!(
                "long-lived task '{}' needs `ready_on_stdout` or `ready_after`",
                name
            )));
        }
    } else if task.ready_on_stdout.is_some() || task.ready_after.is_some() {
        return Err(BootdagError::ConfigError(format!(
            "task '{}' sets a readiness rule but is not `long_lived`",
            name
        )));
    }

    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if dep == name {
                return Err(BootdagError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
            if !cfg.task.contains_key(dep) {
                return Err(BootdagError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_) => Ok(()),
        Err(cycle) => Err(BootdagError::DagCycle(format!(
            "cycle detected in task DAG involving task '{}'",
            cycle.node_id()
        ))),
    }
}
