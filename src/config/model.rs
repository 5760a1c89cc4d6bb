// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::BootstrapConfig;
use crate::exec::long_lived::parse_duration;
use crate::types::{Concurrency, Lanes, Phase, TaskName};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// concurrency = -1
/// phase_timeout = "30s"
///
/// [task.db]
/// start = "run-db"
/// long_lived = true
/// ready_on_stdout = "^ready"
///
/// [task.api]
/// after = ["db"]
/// setup = "echo api"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// A validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(config: ConfigSection, task: BTreeMap<String, TaskConfig>) -> Self {
        Self { config, task }
    }

    /// Orchestrator options derived from `[config]`.
    pub fn bootstrap_config(&self) -> BootstrapConfig {
        let defaults = BootstrapConfig::default();
        BootstrapConfig {
            concurrency: self.config.concurrency,
            phase_timeout: self.config.phase_timeout(),
            shutdown_timeout: self
                .config
                .shutdown_timeout()
                .unwrap_or(defaults.shutdown_timeout),
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// `0` serial, `n > 0` at most `n` pooled workers, negative unbounded.
    #[serde(default)]
    pub concurrency: Concurrency,

    /// Upper bound for each phase, e.g. `"30s"`. Unbounded if absent.
    #[serde(default)]
    pub phase_timeout: Option<String>,

    /// Grace period for long-lived processes after Stop. Defaults to 10s.
    #[serde(default)]
    pub shutdown_timeout: Option<String>,
}

impl ConfigSection {
    /// Parsed `phase_timeout`; `None` if absent or invalid.
    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout
            .as_deref()
            .and_then(|s| parse_duration(s).ok())
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout
            .as_deref()
            .and_then(|s| parse_duration(s).ok())
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Tasks that must be set up and started before this one, and stopped
    /// after it.
    #[serde(default)]
    pub after: Vec<TaskName>,

    #[serde(default)]
    pub init: Option<String>,

    #[serde(default)]
    pub setup: Option<String>,

    #[serde(default)]
    pub start: Option<String>,

    #[serde(default)]
    pub stop: Option<String>,

    /// The start command keeps running until shutdown.
    #[serde(default)]
    pub long_lived: bool,

    /// Regex marking a long-lived start command as ready.
    #[serde(default)]
    pub ready_on_stdout: Option<String>,

    /// Duration after which a long-lived start command counts as ready.
    #[serde(default)]
    pub ready_after: Option<String>,

    /// Phases that may run on the pooled lane, e.g. `["setup", "stop"]`.
    #[serde(default, rename = "async")]
    pub pooled: Vec<String>,
}

impl TaskConfig {
    /// Lane capability from the `async` list. Unknown names are skipped;
    /// validation rejects them up front.
    pub fn lanes(&self) -> Lanes {
        self.pooled
            .iter()
            .filter_map(|s| s.parse::<Phase>().ok())
            .fold(Lanes::serial(), Lanes::with_pooled)
    }
}
