use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;

use bootdag::task::{Component, Dependency, PhaseContext, Service, Started, TaskRef};
use bootdag::types::{BoxFuture, Lanes, Phase, TaskName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Finished,
    Failed,
    /// A serving future returned after shutdown.
    ServeEnded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub task: TaskName,
    pub phase: Phase,
    pub kind: EventKind,
}

/// Ordered record of hook activity, shared by every mock of one test.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, task: &str, phase: Phase, kind: EventKind) {
        self.events.lock().unwrap().push(Event {
            task: task.to_string(),
            phase,
            kind,
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Tasks that logged `kind` during `phase`, in log order.
    pub fn order(&self, phase: Phase, kind: EventKind) -> Vec<TaskName> {
        self.events()
            .into_iter()
            .filter(|e| e.phase == phase && e.kind == kind)
            .map(|e| e.task)
            .collect()
    }

    pub fn started(&self, phase: Phase) -> Vec<TaskName> {
        self.order(phase, EventKind::Started)
    }

    pub fn finished(&self, phase: Phase) -> Vec<TaskName> {
        self.order(phase, EventKind::Finished)
    }

    pub fn index_of(&self, task: &str, phase: Phase, kind: EventKind) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| e.task == task && e.phase == phase && e.kind == kind)
    }

    pub fn count(&self, task: &str, phase: Phase, kind: EventKind) -> usize {
        self.events()
            .iter()
            .filter(|e| e.task == task && e.phase == phase && e.kind == kind)
            .count()
    }

    /// `first` finished `phase` before `second` started it.
    pub fn finished_before(&self, first: &str, second: &str, phase: Phase) -> bool {
        match (
            self.index_of(first, phase, EventKind::Finished),
            self.index_of(second, phase, EventKind::Started),
        ) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    /// Highest number of hooks of `phase` that were in flight at once.
    pub fn max_concurrent(&self, phase: Phase) -> usize {
        let mut current = 0usize;
        let mut max = 0usize;
        for e in self.events().iter().filter(|e| e.phase == phase) {
            match e.kind {
                EventKind::Started => {
                    current += 1;
                    max = max.max(current);
                }
                EventKind::Finished | EventKind::Failed => current = current.saturating_sub(1),
                EventKind::ServeEnded => {}
            }
        }
        max
    }
}

/// Configurable service that records its hooks in an [`ExecutionLog`].
#[derive(Clone)]
pub struct MockService {
    name: TaskName,
    log: ExecutionLog,
    delay: Duration,
    delays: HashMap<Phase, Duration>,
    fail_on: Option<Phase>,
    lanes: Lanes,
    dependencies: Vec<Dependency>,
    serve: bool,
}

impl MockService {
    pub fn new(name: &str, log: &ExecutionLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            delay: Duration::ZERO,
            delays: HashMap::new(),
            fail_on: None,
            lanes: Lanes::serial(),
            dependencies: Vec::new(),
            serve: false,
        }
    }

    /// Sleep this long in every hook.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn delay_in(mut self, phase: Phase, delay: Duration) -> Self {
        self.delays.insert(phase, delay);
        self
    }

    pub fn fail_on(mut self, phase: Phase) -> Self {
        self.fail_on = Some(phase);
        self
    }

    /// Every phase on the pooled lane.
    pub fn pooled(mut self) -> Self {
        self.lanes = Lanes::pooled();
        self
    }

    pub fn pooled_in(mut self, phase: Phase) -> Self {
        self.lanes = self.lanes.with_pooled(phase);
        self
    }

    /// Declare a dependency on an already registered key.
    pub fn after(mut self, key: &str) -> Self {
        self.dependencies.push(Dependency::key(key));
        self
    }

    /// Declare a dependency on an instance, registered on demand.
    pub fn depends_on(mut self, service: MockService) -> Self {
        self.dependencies.push(Dependency::on(service));
        self
    }

    pub fn depends_on_keyed(mut self, service: MockService, key: &str) -> Self {
        self.dependencies.push(Dependency::keyed(service, key));
        self
    }

    /// Return a serving future from `start` that runs until shutdown.
    pub fn serving(mut self) -> Self {
        self.serve = true;
        self
    }

    fn delay_for(&self, phase: Phase) -> Duration {
        self.delays.get(&phase).copied().unwrap_or(self.delay)
    }

    async fn step(&self, ctx: &PhaseContext) -> anyhow::Result<()> {
        let phase = ctx.phase();
        self.log.record(ctx.task(), phase, EventKind::Started);

        let delay = self.delay_for(phase);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_on == Some(phase) {
            self.log.record(ctx.task(), phase, EventKind::Failed);
            bail!("{} failed on purpose during {}", ctx.task(), phase);
        }

        self.log.record(ctx.task(), phase, EventKind::Finished);
        Ok(())
    }
}

impl Service for MockService {
    fn name(&self) -> TaskName {
        self.name.clone()
    }

    fn lanes(&self) -> Lanes {
        self.lanes
    }

    fn init(&self, ctx: PhaseContext) -> BoxFuture<'_, anyhow::Result<Vec<Dependency>>> {
        Box::pin(async move {
            self.step(&ctx).await?;
            Ok(self.dependencies.clone())
        })
    }

    fn setup(&self, ctx: PhaseContext) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move { self.step(&ctx).await })
    }

    fn start(&self, ctx: PhaseContext) -> BoxFuture<'_, anyhow::Result<Started>> {
        Box::pin(async move {
            self.step(&ctx).await?;
            if !self.serve {
                return Ok(Started::Ready);
            }

            let log = self.log.clone();
            let task = ctx.task().to_string();
            let shutdown = ctx.shutdown().clone();
            Ok(Started::Serving(Box::pin(async move {
                shutdown.cancelled().await;
                log.record(&task, Phase::Start, EventKind::ServeEnded);
                Ok(())
            })))
        })
    }

    fn stop(&self, ctx: PhaseContext) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move { self.step(&ctx).await })
    }
}

/// Wrap `services` into components at `status` and wire `(dependent,
/// dependency)` pairs, bypassing Init.
pub fn wired(
    services: Vec<MockService>,
    status: Phase,
    edges: &[(&str, &str)],
) -> Vec<Arc<Component>> {
    let components: Vec<Arc<Component>> = services
        .into_iter()
        .map(|s| {
            let name = s.name.clone();
            Arc::new(Component::new(Arc::new(s), name, status))
        })
        .collect();

    let find = |name: &str| {
        components
            .iter()
            .find(|c| bootdag::task::Task::name(c.as_ref()) == name)
            .unwrap_or_else(|| panic!("no component named '{name}'"))
    };

    for (dependent, dependency) in edges {
        find(dependent)
            .depend_on(find(dependency))
            .expect("wiring test edge");
    }

    components
}

pub fn task_refs(components: &[Arc<Component>]) -> Vec<TaskRef> {
    components
        .iter()
        .map(|c| Arc::clone(c) as TaskRef)
        .collect()
}
