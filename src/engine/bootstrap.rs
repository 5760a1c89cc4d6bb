// src/engine/bootstrap.rs

//! The orchestrator: registers services, wires their declared dependencies
//! and sequences Init -> Setup -> Start -> Stop.
//!
//! Every phase gets its own [`Scheduler`]. The set of tasks handed to a phase
//! is what finished the previous one, so a service whose Setup failed is never
//! started, and Stop only visits services that were set up.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dag::{Scheduler, check_acyclic};
use crate::errors::{BootdagError, Result};
use crate::task::service::ServeScope;
use crate::task::{Component, Dependency, Service, Task, TaskRef};
use crate::types::{Concurrency, Phase, TaskName};

/// Orchestrator options.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Concurrency for Setup, Start and Stop. Init always runs serialized.
    pub concurrency: Concurrency,
    /// Upper bound for a single phase; `None` waits forever.
    pub phase_timeout: Option<Duration>,
    /// How long serving futures get to exit once Stop has run.
    pub shutdown_timeout: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            concurrency: Concurrency::Unbounded,
            phase_timeout: None,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

pub struct Bootstrap {
    config: BootstrapConfig,
    /// Registration order; also the task-list order of every phase.
    components: Vec<Arc<Component>>,
    keys: HashMap<TaskName, Arc<Component>>,
    schedulers: HashMap<Phase, Arc<Scheduler>>,
    /// Parent scope of Init, Setup and Start. Cancelled by `interrupt`.
    bring_up: CancellationToken,
    /// Parent scope of Stop; only cancelled when the bootstrap is dropped.
    teardown: CancellationToken,
    serve: ServeScope,
}

impl Bootstrap {
    pub fn new(config: BootstrapConfig) -> Self {
        Self {
            config,
            components: Vec::new(),
            keys: HashMap::new(),
            schedulers: HashMap::new(),
            bring_up: CancellationToken::new(),
            teardown: CancellationToken::new(),
            serve: ServeScope::new(),
        }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Register a service under its own name.
    ///
    /// Adding a second service under an existing key is a no-op.
    pub fn add<S: Service>(&mut self, service: S) -> Result<Arc<Component>> {
        self.add_shared(Arc::new(service), None, Phase::Uninitialized)
    }

    /// Register a service under an explicit key, allowing several instances
    /// of the same service type.
    pub fn add_with_key<S: Service>(
        &mut self,
        service: S,
        key: impl Into<TaskName>,
    ) -> Result<Arc<Component>> {
        self.add_shared(Arc::new(service), Some(key.into()), Phase::Uninitialized)
    }

    /// Register a service that already reached `status` outside of the
    /// bootstrap; earlier phases are skipped for it.
    pub fn add_with_status<S: Service>(
        &mut self,
        service: S,
        key: Option<TaskName>,
        status: Phase,
    ) -> Result<Arc<Component>> {
        self.add_shared(Arc::new(service), key, status)
    }

    pub fn add_many<I>(&mut self, services: I) -> Result<()>
    where
        I: IntoIterator<Item = Arc<dyn Service>>,
    {
        for service in services {
            self.add_shared(service, None, Phase::Uninitialized)?;
        }
        Ok(())
    }

    pub fn add_shared(
        &mut self,
        service: Arc<dyn Service>,
        key: Option<TaskName>,
        status: Phase,
    ) -> Result<Arc<Component>> {
        let key = key.unwrap_or_else(|| service.name());
        if key.trim().is_empty() {
            return Err(BootdagError::ConfigError(
                "service key must not be empty".to_string(),
            ));
        }

        if let Some(existing) = self.keys.get(&key) {
            debug!(task = %key, "service already registered under this key");
            return Ok(Arc::clone(existing));
        }

        let component = Arc::new(Component::with_scope(
            service,
            key.clone(),
            status,
            self.serve.clone(),
        ));
        self.keys.insert(key.clone(), Arc::clone(&component));
        self.components.push(Arc::clone(&component));
        info!(task = %key, %status, "service added");
        Ok(component)
    }

    /// Look up a registered component by key.
    pub fn lookup(&self, key: &str) -> Option<Arc<Component>> {
        self.keys.get(key).cloned()
    }

    pub fn components(&self) -> &[Arc<Component>] {
        &self.components
    }

    /// Scheduler of the last run of `phase`, if any.
    pub fn scheduler(&self, phase: Phase) -> Option<Arc<Scheduler>> {
        self.schedulers.get(&phase).cloned()
    }

    fn task_refs(&self) -> Vec<TaskRef> {
        self.components
            .iter()
            .map(|c| Arc::clone(c) as TaskRef)
            .collect()
    }

    /// Run every `init` hook, in registration order, and wire the declared
    /// dependencies into the graph.
    ///
    /// Services registered while resolving declarations are initialised too.
    /// Fails on unknown keys, self dependencies and cycles.
    pub async fn init(&mut self) -> Result<()> {
        let mut idx = 0;
        while idx < self.components.len() {
            let component = Arc::clone(&self.components[idx]);
            if let Err(err) = component.run(self.bring_up.child_token(), Phase::Init).await {
                if !err.is_benign() {
                    error!(task = %component.name(), error = %err, "init failed");
                    return Err(err);
                }
            }
            self.wire(&component)?;
            idx += 1;
        }

        let tasks = self.task_refs();
        check_acyclic(&tasks)?;

        let parent = self.bring_up.clone();
        self.execute(Phase::Init, tasks, Concurrency::Serial, &parent)
            .await
    }

    fn wire(&mut self, component: &Arc<Component>) -> Result<()> {
        let declared = component.take_declarations();
        debug!(task = %component.name(), dependencies = declared.len(), "wiring dependencies");

        for dependency in declared {
            let key = dependency.resolve_key();
            if key.trim().is_empty() {
                return Err(BootdagError::ConfigError(format!(
                    "task '{}' declared a dependency with an empty key",
                    component.name()
                )));
            }

            let target = match self.keys.get(&key) {
                Some(existing) => Arc::clone(existing),
                None => match dependency {
                    Dependency::Instance { service, .. } => {
                        self.add_shared(service, Some(key.clone()), Phase::Uninitialized)?
                    }
                    Dependency::Key(_) => {
                        return Err(BootdagError::TaskNotFound(format!(
                            "'{}' (declared by '{}')",
                            key,
                            component.name()
                        )));
                    }
                },
            };
            component.depend_on(&target)?;
        }
        Ok(())
    }

    /// Set up everything that finished Init.
    pub async fn setup(&mut self) -> Result<()> {
        let tasks = self.survivors(Phase::Init, Phase::Setup).await?;
        let parent = self.bring_up.clone();
        self.execute(Phase::Setup, tasks, self.config.concurrency, &parent)
            .await
    }

    /// Start everything that finished Setup.
    pub async fn start(&mut self) -> Result<()> {
        let tasks = self.survivors(Phase::Setup, Phase::Start).await?;
        let parent = self.bring_up.clone();
        self.execute(Phase::Start, tasks, self.config.concurrency, &parent)
            .await
    }

    /// Stop everything that was set up, consumers first, then let serving
    /// futures wind down.
    ///
    /// Succeeds without doing anything if Setup never ran.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(start) = self.schedulers.get(&Phase::Start).cloned() {
            start.interrupt();
            let (_, err) = start.release().await;
            if let Some(err) = err {
                warn!(error = %err, "start phase ended with error");
            }
        }

        let Some(setup) = self.schedulers.get(&Phase::Setup).cloned() else {
            info!("setup was never executed; nothing to stop");
            return Ok(());
        };
        setup.interrupt();
        let (tasks, err) = setup.release().await;
        if let Some(err) = err {
            warn!(error = %err, "setup phase ended with error");
        }

        info!(tasks = tasks.len(), "executing stop");
        let scheduler = Arc::new(Scheduler::new(
            &self.teardown,
            tasks,
            Phase::Stop,
            self.config.concurrency,
        ));
        for component in &self.components {
            if component.status() < Phase::Setup {
                scheduler.set_ignore(component.name());
            }
        }
        self.schedulers.insert(Phase::Stop, Arc::clone(&scheduler));

        let res = self.run_bounded(&scheduler).await;
        if let Err(err) = &res {
            error!(error = %err, "stop phase failed; continuing shutdown");
        }

        self.serve.shutdown(self.config.shutdown_timeout).await;
        res
    }

    /// Run a single phase by value.
    pub async fn run_phase(&mut self, phase: Phase) -> Result<()> {
        match phase {
            Phase::Uninitialized => Ok(()),
            Phase::Init => self.init().await,
            Phase::Setup => self.setup().await,
            Phase::Start => self.start().await,
            Phase::Stop => self.stop().await,
        }
    }

    /// Init, Setup and Start, stopping at the first failure.
    pub async fn bring_up(&mut self) -> Result<()> {
        self.init().await?;
        self.setup().await?;
        self.start().await
    }

    /// Token that interrupts bring-up when cancelled. Usable from other tasks
    /// while a phase is running.
    pub fn interrupter(&self) -> CancellationToken {
        self.bring_up.clone()
    }

    /// Stop waiting: tasks waiting on dependencies give up, running hooks are
    /// left to finish.
    pub fn interrupt(&self) {
        self.bring_up.cancel();
        for scheduler in self.schedulers.values() {
            scheduler.interrupt();
        }
    }

    /// Drop the graph and all scheduler state.
    pub fn deinit(&mut self) {
        debug!(tasks = self.components.len(), "deinit bootstrap");
        self.schedulers.clear();
        self.keys.clear();
        self.components.clear();
    }

    /// Hand the tasks that finished `previous` to `phase`.
    async fn survivors(&mut self, previous: Phase, phase: Phase) -> Result<Vec<TaskRef>> {
        let Some(scheduler) = self.schedulers.get(&previous).cloned() else {
            return Err(BootdagError::PhaseNotReached {
                phase,
                required: previous,
            });
        };
        scheduler.interrupt();
        let (tasks, err) = scheduler.release().await;
        if let Some(err) = err {
            warn!(previous = %previous, error = %err, "previous phase ended with error");
        }
        Ok(tasks)
    }

    async fn execute(
        &mut self,
        phase: Phase,
        tasks: Vec<TaskRef>,
        concurrency: Concurrency,
        parent: &CancellationToken,
    ) -> Result<()> {
        info!(%phase, tasks = tasks.len(), "executing phase");
        let scheduler = Arc::new(Scheduler::new(parent, tasks, phase, concurrency));
        self.schedulers.insert(phase, Arc::clone(&scheduler));
        self.run_bounded(&scheduler).await
    }

    /// Run `scheduler`, interrupting it if the phase timeout elapses.
    async fn run_bounded(&self, scheduler: &Scheduler) -> Result<()> {
        let Some(after) = self.config.phase_timeout else {
            return scheduler.run().await;
        };

        let run = scheduler.run();
        tokio::pin!(run);
        tokio::select! {
            res = &mut run => res,
            _ = tokio::time::sleep(after) => {
                warn!(phase = %scheduler.phase(), ?after, "phase timed out; interrupting");
                scheduler.interrupt();
                let _ = run.await;
                Err(BootdagError::Timeout { phase: scheduler.phase(), after })
            }
        }
    }

    /// Bring everything up, wait for `shutdown`, then tear down.
    ///
    /// If `shutdown` resolves during bring-up, bring-up is interrupted and
    /// whatever was set up is stopped. A failed bring-up goes straight to
    /// teardown.
    pub async fn run_until_shutdown<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let interrupter = self.interrupter();
        tokio::pin!(shutdown);

        let mut shutdown_seen = false;
        let up = {
            let bring_up = self.bring_up();
            tokio::pin!(bring_up);
            tokio::select! {
                res = &mut bring_up => res,
                _ = &mut shutdown => {
                    shutdown_seen = true;
                    info!("shutdown requested during bring-up; interrupting");
                    interrupter.cancel();
                    bring_up.await
                }
            }
        };

        match &up {
            Ok(()) => {
                info!(tasks = self.components.len(), "all services started");
                if !shutdown_seen {
                    shutdown.await;
                    info!("shutdown requested");
                }
            }
            Err(err) => error!(error = %err, "bring-up failed; tearing down"),
        }

        let down = self.stop().await;
        self.deinit();

        match up {
            Err(err) if !(shutdown_seen && err.is_cancelled()) => Err(err),
            _ => down,
        }
    }
}

impl Drop for Bootstrap {
    fn drop(&mut self) {
        self.bring_up.cancel();
        self.teardown.cancel();
    }
}
