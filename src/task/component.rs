// src/task/component.rs

//! Per-task lifecycle state machine.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dag::graph::Edges;
use crate::errors::{BootdagError, Result};
use crate::task::service::{Dependency, PhaseContext, ServeScope, Service, Started};
use crate::task::Task;
use crate::types::{BoxFuture, Lanes, Phase, TaskName};

/// A registered [`Service`] plus everything needed to schedule it.
///
/// - `status` is the highest phase reached; it only ever moves forward.
/// - `guards` holds one lock per phase so that the same phase can never run
///   twice concurrently on one task, even if it is dispatched through two
///   dependency paths.
/// - `edges` is written during Init only and read by every scheduler run.
pub struct Component {
    name: TaskName,
    service: Arc<dyn Service>,
    lanes: Lanes,
    status: RwLock<Phase>,
    guards: [tokio::sync::Mutex<()>; 4],
    edges: RwLock<Edges>,
    /// Dependency instances in declaration order, handed to hooks.
    resolved: RwLock<Vec<Arc<dyn Service>>>,
    /// Declarations returned from `init`, waiting to be wired by the bootstrap.
    declared: Mutex<Option<Vec<Dependency>>>,
    serve: ServeScope,
}

impl Component {
    pub fn new(service: Arc<dyn Service>, name: impl Into<TaskName>, status: Phase) -> Self {
        Self::with_scope(service, name, status, ServeScope::new())
    }

    /// Build a component whose serving futures belong to `serve`.
    pub fn with_scope(
        service: Arc<dyn Service>,
        name: impl Into<TaskName>,
        status: Phase,
        serve: ServeScope,
    ) -> Self {
        let lanes = service.lanes();
        Self {
            name: name.into(),
            service,
            lanes,
            status: RwLock::new(status),
            guards: Default::default(),
            edges: RwLock::new(Edges::default()),
            resolved: RwLock::new(Vec::new()),
            declared: Mutex::new(None),
            serve,
        }
    }

    pub fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }

    pub fn status(&self) -> Phase {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, phase: Phase) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    pub fn edges(&self) -> Edges {
        self.edges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record that `self` depends on `dependency`, on both ends.
    ///
    /// Returns `false` if the edge was already present.
    pub fn depend_on(&self, dependency: &Component) -> Result<bool> {
        if dependency.name == self.name {
            return Err(BootdagError::ConfigError(format!(
                "task '{}' cannot depend on itself",
                self.name
            )));
        }

        let added = self
            .edges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_following(&dependency.name);
        dependency
            .edges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_follower(&self.name);

        if added {
            self.resolved
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Arc::clone(&dependency.service));
            debug!(task = %self.name, dependency = %dependency.name, "dependency wired");
        }
        Ok(added)
    }

    /// Take the declarations produced by the last `init` hook.
    pub fn take_declarations(&self) -> Vec<Dependency> {
        self.declared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default()
    }

    fn guard(&self, phase: Phase) -> Option<&tokio::sync::Mutex<()>> {
        phase.slot().map(|idx| &self.guards[idx])
    }

    fn context(&self, phase: Phase, token: CancellationToken) -> PhaseContext {
        let dependencies = self
            .resolved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        PhaseContext::new(
            phase,
            self.name.clone(),
            token,
            self.serve.shutdown_token(),
            dependencies,
        )
    }

    fn already_ran(&self, phase: Phase) -> BootdagError {
        BootdagError::AlreadyRan {
            task: self.name.clone(),
            phase,
        }
    }

    fn callback_error(&self, phase: Phase, source: anyhow::Error) -> BootdagError {
        BootdagError::Callback {
            task: self.name.clone(),
            phase,
            source: source.into(),
        }
    }

    async fn run_phase(&self, token: CancellationToken, phase: Phase) -> Result<()> {
        let Some(guard) = self.guard(phase) else {
            return Err(self.already_ran(phase));
        };
        let _held = guard.lock().await;

        let current = self.status();
        if current >= phase {
            debug!(task = %self.name, %phase, status = %current, "skip: phase already reached");
            return Err(self.already_ran(phase));
        }
        if phase.is_teardown() && current < Phase::Setup {
            // Stop hooks only ever observe fully set-up services.
            debug!(task = %self.name, status = %current, "skip stop: service was never set up");
            self.set_status(Phase::Stop);
            return Err(self.already_ran(phase));
        }

        let ctx = self.context(phase, token);
        match phase {
            Phase::Init => {
                let declared = self
                    .service
                    .init(ctx)
                    .await
                    .map_err(|e| self.callback_error(phase, e))?;
                debug!(task = %self.name, declared = declared.len(), "dependencies declared");
                *self.declared.lock().unwrap_or_else(PoisonError::into_inner) = Some(declared);
            }
            Phase::Setup => {
                self.service
                    .setup(ctx)
                    .await
                    .map_err(|e| self.callback_error(phase, e))?;
            }
            Phase::Start => {
                let started = self
                    .service
                    .start(ctx)
                    .await
                    .map_err(|e| self.callback_error(phase, e))?;
                if let Started::Serving(serving) = started {
                    self.serve.spawn(self.name.clone(), serving);
                }
            }
            Phase::Stop => {
                self.service
                    .stop(ctx)
                    .await
                    .map_err(|e| self.callback_error(phase, e))?;
            }
            Phase::Uninitialized => {}
        }

        self.set_status(phase);
        info!(task = %self.name, %phase, "phase completed");
        Ok(())
    }
}

impl Task for Component {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, token: CancellationToken, phase: Phase) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.run_phase(token, phase))
    }

    fn is_async(&self, phase: Phase) -> bool {
        self.lanes.is_pooled(phase)
    }

    fn dependencies_for(&self, phase: Phase) -> Vec<TaskName> {
        self.edges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dependencies_for(phase)
            .to_vec()
    }

    fn followers_for(&self, phase: Phase) -> Vec<TaskName> {
        self.edges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .followers_for(phase)
            .to_vec()
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("lanes", &self.lanes)
            .field("edges", &self.edges())
            .finish_non_exhaustive()
    }
}
