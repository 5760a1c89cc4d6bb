// src/exec/command.rs

//! Services backed by shell commands.

use std::process::Stdio;

use anyhow::{Context, bail};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TaskConfig;
use crate::exec::long_lived::{Readiness, drain_lines, serve_until_shutdown, wait_ready};
use crate::task::{Dependency, PhaseContext, Service, Started};
use crate::types::{BoxFuture, Lanes, Phase, TaskName};

/// One shell command per phase, all optional.
#[derive(Debug, Clone, Default)]
pub struct PhaseCommands {
    pub init: Option<String>,
    pub setup: Option<String>,
    pub start: Option<String>,
    pub stop: Option<String>,
}

impl PhaseCommands {
    pub fn get(&self, phase: Phase) -> Option<&str> {
        match phase {
            Phase::Uninitialized => None,
            Phase::Init => self.init.as_deref(),
            Phase::Setup => self.setup.as_deref(),
            Phase::Start => self.start.as_deref(),
            Phase::Stop => self.stop.as_deref(),
        }
    }
}

/// A service whose phases run shell commands.
///
/// Dependencies are declared by key (`after`), so every referenced task must
/// be registered before Init. With a readiness rule, the start command is a
/// long-lived process: Start completes once it is ready and the process keeps
/// running until shutdown.
#[derive(Debug, Clone)]
pub struct CommandService {
    name: TaskName,
    after: Vec<TaskName>,
    commands: PhaseCommands,
    readiness: Option<Readiness>,
    lanes: Lanes,
}

impl CommandService {
    pub fn new(name: impl Into<TaskName>) -> Self {
        Self {
            name: name.into(),
            after: Vec::new(),
            commands: PhaseCommands::default(),
            readiness: None,
            lanes: Lanes::serial(),
        }
    }

    /// Build from a validated task section.
    pub fn from_config(name: &str, cfg: &TaskConfig) -> anyhow::Result<Self> {
        let readiness = if !cfg.long_lived {
            None
        } else if let Some(pattern) = &cfg.ready_on_stdout {
            Some(Readiness::on_stdout(pattern)?)
        } else if let Some(after) = &cfg.ready_after {
            Some(Readiness::after(after)?)
        } else {
            bail!("long-lived task '{name}' has no readiness rule");
        };

        Ok(Self {
            name: name.to_string(),
            after: cfg.after.clone(),
            commands: PhaseCommands {
                init: cfg.init.clone(),
                setup: cfg.setup.clone(),
                start: cfg.start.clone(),
                stop: cfg.stop.clone(),
            },
            readiness,
            lanes: cfg.lanes(),
        })
    }

    pub fn after(mut self, dependency: impl Into<TaskName>) -> Self {
        self.after.push(dependency.into());
        self
    }

    pub fn command(mut self, phase: Phase, cmd: impl Into<String>) -> Self {
        let cmd = Some(cmd.into());
        match phase {
            Phase::Init => self.commands.init = cmd,
            Phase::Setup => self.commands.setup = cmd,
            Phase::Start => self.commands.start = cmd,
            Phase::Stop => self.commands.stop = cmd,
            Phase::Uninitialized => {}
        }
        self
    }

    pub fn long_lived(mut self, readiness: Readiness) -> Self {
        self.readiness = Some(readiness);
        self
    }

    pub fn with_lanes(mut self, lanes: Lanes) -> Self {
        self.lanes = lanes;
        self
    }

    pub fn dependencies(&self) -> &[TaskName] {
        &self.after
    }

    async fn run_phase_command(&self, ctx: &PhaseContext) -> anyhow::Result<()> {
        match self.commands.get(ctx.phase()) {
            Some(cmd) => run_command(ctx.task(), cmd, ctx.token()).await,
            None => {
                debug!(task = %ctx.task(), phase = %ctx.phase(), "no command configured");
                Ok(())
            }
        }
    }

    async fn start_long_lived(
        &self,
        ctx: &PhaseContext,
        cmd: &str,
        readiness: &Readiness,
    ) -> anyhow::Result<Started> {
        let task = ctx.task().to_string();
        info!(task = %task, cmd = %cmd, "starting long-lived process");

        let mut child = shell(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning process for task '{task}'"))?;

        if let Some(stderr) = child.stderr.take() {
            drain_lines(task.clone(), "stderr", stderr);
        }
        let stdout = child.stdout.take();

        wait_ready(&task, readiness, &mut child, stdout, ctx.token()).await?;

        let shutdown = ctx.shutdown().clone();
        Ok(Started::Serving(Box::pin(serve_until_shutdown(
            task, child, shutdown,
        ))))
    }
}

impl Service for CommandService {
    fn name(&self) -> TaskName {
        self.name.clone()
    }

    fn lanes(&self) -> Lanes {
        self.lanes
    }

    fn init(&self, ctx: PhaseContext) -> BoxFuture<'_, anyhow::Result<Vec<Dependency>>> {
        Box::pin(async move {
            self.run_phase_command(&ctx).await?;
            Ok(self.after.iter().map(Dependency::key).collect())
        })
    }

    fn setup(&self, ctx: PhaseContext) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move { self.run_phase_command(&ctx).await })
    }

    fn start(&self, ctx: PhaseContext) -> BoxFuture<'_, anyhow::Result<Started>> {
        Box::pin(async move {
            match (&self.readiness, self.commands.start.as_deref()) {
                (Some(readiness), Some(cmd)) => self.start_long_lived(&ctx, cmd, readiness).await,
                _ => {
                    self.run_phase_command(&ctx).await?;
                    Ok(Started::Ready)
                }
            }
        })
    }

    fn stop(&self, ctx: PhaseContext) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move { self.run_phase_command(&ctx).await })
    }
}

/// Build a shell command appropriate for the platform.
fn shell(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

/// Run `cmd` to completion, logging its output.
///
/// The process is killed if `token` fires first.
pub async fn run_command(task: &str, cmd: &str, token: &CancellationToken) -> anyhow::Result<()> {
    info!(task = %task, cmd = %cmd, "running command");

    let mut child = shell(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning process for task '{task}'"))?;

    if let Some(stdout) = child.stdout.take() {
        drain_lines(task.to_string(), "stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        drain_lines(task.to_string(), "stderr", stderr);
    }

    tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("waiting for process of task '{task}'"))?;
            let code = status.code().unwrap_or(-1);
            info!(task = %task, exit_code = code, success = status.success(), "command exited");
            if !status.success() {
                bail!("command `{cmd}` exited with code {code}");
            }
            Ok(())
        }
        _ = token.cancelled() => {
            warn!(task = %task, "cancellation requested; killing command");
            if let Err(e) = child.kill().await {
                warn!(task = %task, error = %e, "failed to kill command on cancellation");
            }
            bail!("command `{cmd}` cancelled")
        }
    }
}
