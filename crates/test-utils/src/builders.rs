#![allow(dead_code)]

use std::collections::BTreeMap;

use bootdag::config::{ConfigFile, ConfigSection, RawConfigFile, TaskConfig};
use bootdag::types::Concurrency;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn concurrency(mut self, value: i64) -> Self {
        self.config.config.concurrency = Concurrency::from(value);
        self
    }

    pub fn phase_timeout(mut self, value: &str) -> Self {
        self.config.config.phase_timeout = Some(value.to_string());
        self
    }

    pub fn shutdown_timeout(mut self, value: &str) -> Self {
        self.config.config.shutdown_timeout = Some(value.to_string());
        self
    }

    /// The unvalidated form, for tests that exercise validation itself.
    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
#[derive(Default)]
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn init(mut self, cmd: &str) -> Self {
        self.task.init = Some(cmd.to_string());
        self
    }

    pub fn setup(mut self, cmd: &str) -> Self {
        self.task.setup = Some(cmd.to_string());
        self
    }

    pub fn start(mut self, cmd: &str) -> Self {
        self.task.start = Some(cmd.to_string());
        self
    }

    pub fn stop(mut self, cmd: &str) -> Self {
        self.task.stop = Some(cmd.to_string());
        self
    }

    pub fn long_lived(mut self, val: bool) -> Self {
        self.task.long_lived = val;
        self
    }

    pub fn ready_on_stdout(mut self, pattern: &str) -> Self {
        self.task.ready_on_stdout = Some(pattern.to_string());
        self
    }

    pub fn ready_after(mut self, duration: &str) -> Self {
        self.task.ready_after = Some(duration.to_string());
        self
    }

    pub fn pooled(mut self, phase: &str) -> Self {
        self.task.pooled.push(phase.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
