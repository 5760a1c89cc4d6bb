// src/task/service.rs

//! User-facing service hooks.
//!
//! A [`Service`] only describes *what* happens in each phase. Ordering,
//! idempotence and lane selection are handled by the
//! [`Component`](super::Component) that wraps it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::types::{BoxFuture, Lanes, Phase, TaskName};

/// Outcome of a `start` hook.
pub enum Started {
    /// The service is up; nothing keeps running in the background.
    Ready,
    /// The service is up and keeps serving in the given future until the
    /// shutdown token of its [`PhaseContext`] fires.
    Serving(BoxFuture<'static, anyhow::Result<()>>),
}

impl fmt::Debug for Started {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Started::Ready => f.write_str("Ready"),
            Started::Serving(_) => f.write_str("Serving(..)"),
        }
    }
}

/// A managed component's lifecycle hooks.
///
/// Every hook has a no-op default, so a service only implements the phases it
/// cares about.
pub trait Service: Send + Sync + 'static {
    /// Default registration key. An explicit key passed to the bootstrap
    /// overrides it.
    fn name(&self) -> TaskName;

    /// Phases allowed on the pooled lane. Read once, at registration.
    fn lanes(&self) -> Lanes {
        Lanes::serial()
    }

    /// Declare dependencies. Called exactly once, during Init.
    fn init(&self, _ctx: PhaseContext) -> BoxFuture<'_, anyhow::Result<Vec<Dependency>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn setup(&self, _ctx: PhaseContext) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Bring the service up. The phase is complete as soon as this returns;
    /// long-running work goes into [`Started::Serving`].
    fn start(&self, _ctx: PhaseContext) -> BoxFuture<'_, anyhow::Result<Started>> {
        Box::pin(async { Ok(Started::Ready) })
    }

    fn stop(&self, _ctx: PhaseContext) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// A dependency declared from [`Service::init`].
#[derive(Clone)]
pub enum Dependency {
    /// Depend on this instance, registered under `key` (or its own name).
    ///
    /// If the key is already registered, the existing task is used and the
    /// given instance is dropped.
    Instance {
        service: Arc<dyn Service>,
        key: Option<TaskName>,
    },
    /// Depend on a task already registered under this key.
    Key(TaskName),
}

impl Dependency {
    pub fn on<S: Service>(service: S) -> Self {
        Dependency::Instance {
            service: Arc::new(service),
            key: None,
        }
    }

    pub fn on_shared(service: Arc<dyn Service>) -> Self {
        Dependency::Instance { service, key: None }
    }

    pub fn keyed<S: Service>(service: S, key: impl Into<TaskName>) -> Self {
        Dependency::Instance {
            service: Arc::new(service),
            key: Some(key.into()),
        }
    }

    pub fn key(key: impl Into<TaskName>) -> Self {
        Dependency::Key(key.into())
    }

    /// Key this dependency resolves to.
    pub fn resolve_key(&self) -> TaskName {
        match self {
            Dependency::Instance { service, key } => {
                key.clone().unwrap_or_else(|| service.name())
            }
            Dependency::Key(key) => key.clone(),
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Instance { service, key } => f
                .debug_struct("Instance")
                .field("service", &service.name())
                .field("key", key)
                .finish(),
            Dependency::Key(key) => f.debug_tuple("Key").field(key).finish(),
        }
    }
}

/// Everything a hook gets to see about the phase it runs in.
#[derive(Clone)]
pub struct PhaseContext {
    phase: Phase,
    task: TaskName,
    token: CancellationToken,
    shutdown: CancellationToken,
    dependencies: Vec<Arc<dyn Service>>,
}

impl PhaseContext {
    pub fn new(
        phase: Phase,
        task: TaskName,
        token: CancellationToken,
        shutdown: CancellationToken,
        dependencies: Vec<Arc<dyn Service>>,
    ) -> Self {
        Self {
            phase,
            task,
            token,
            shutdown,
            dependencies,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Registration key of the task running this hook.
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Cancellation scope of the current scheduler run.
    ///
    /// Cancellation is cooperative: a hook that wants to stop early has to
    /// watch this token itself.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fires once the bootstrap has finished stopping services. Serving
    /// futures returned from `start` should exit when it does.
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Resolved dependency instances, in declaration order.
    pub fn dependencies(&self) -> &[Arc<dyn Service>] {
        &self.dependencies
    }

    pub fn dependency(&self, name: &str) -> Option<&Arc<dyn Service>> {
        self.dependencies.iter().find(|s| s.name() == name)
    }
}

impl fmt::Debug for PhaseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseContext")
            .field("phase", &self.phase)
            .field("task", &self.task)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Owner of serving futures handed back from `start` hooks.
///
/// One scope is shared by every component of a bootstrap; shutting it down
/// cancels the shared token and waits for the futures to return.
#[derive(Debug, Clone, Default)]
pub struct ServeScope {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl ServeScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn spawn(&self, task: TaskName, serving: BoxFuture<'static, anyhow::Result<()>>) {
        debug!(task = %task, "service keeps serving in the background");
        self.tracker.spawn(async move {
            match serving.await {
                Ok(()) => debug!(task = %task, "serving future finished"),
                Err(err) => warn!(task = %task, error = %err, "serving future failed"),
            }
        });
    }

    /// Signal shutdown and wait up to `grace` for serving futures to return.
    ///
    /// Returns `false` if some futures were still running when `grace`
    /// elapsed.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shutdown.cancel();
        self.tracker.close();
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                info!("all serving futures finished");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    ?grace,
                    "serving futures still running after shutdown grace period"
                );
                false
            }
        }
    }
}
