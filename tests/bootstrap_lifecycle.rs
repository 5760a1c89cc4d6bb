mod common;
use crate::common::*;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bootdag::errors::BootdagError;
use bootdag::task::{Dependency, PhaseContext, Service};
use bootdag::types::{BoxFuture, Concurrency, Phase, TaskName};
use bootdag::{Bootstrap, BootstrapConfig};

fn bootstrap(concurrency: i64) -> Bootstrap {
    Bootstrap::new(BootstrapConfig {
        concurrency: Concurrency::from(concurrency),
        phase_timeout: None,
        shutdown_timeout: Duration::from_secs(1),
    })
}

#[tokio::test]
async fn declared_instances_are_registered_and_ordered() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add(MockService::new("api", &log).depends_on(MockService::new("db", &log)))?;

    with_timeout(boot.init()).await?;
    assert!(boot.lookup("db").is_some());
    assert_eq!(log.started(Phase::Init), vec!["api", "db"]);

    with_timeout(boot.setup()).await?;
    with_timeout(boot.start()).await?;
    with_timeout(boot.stop()).await?;

    assert_eq!(log.finished(Phase::Setup), vec!["db", "api"]);
    assert_eq!(log.finished(Phase::Start), vec!["db", "api"]);
    assert_eq!(log.finished(Phase::Stop), vec!["api", "db"]);
    Ok(())
}

#[tokio::test]
async fn shared_dependency_is_registered_once() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add(MockService::new("api", &log).depends_on(MockService::new("db", &log)))?;
    boot.add(MockService::new("worker", &log).depends_on(MockService::new("db", &log)))?;

    with_timeout(boot.bring_up()).await?;

    assert_eq!(boot.components().len(), 3);
    assert_eq!(log.count("db", Phase::Setup, EventKind::Started), 1);
    assert!(log.finished_before("db", "api", Phase::Setup));
    assert!(log.finished_before("db", "worker", Phase::Setup));
    Ok(())
}

#[tokio::test]
async fn explicit_keys_create_distinct_instances() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add(
        MockService::new("api", &log)
            .depends_on_keyed(MockService::new("db", &log), "db-primary")
            .depends_on_keyed(MockService::new("db", &log), "db-replica"),
    )?;

    with_timeout(boot.bring_up()).await?;

    assert!(boot.lookup("db-primary").is_some());
    assert!(boot.lookup("db-replica").is_some());
    assert!(boot.lookup("db").is_none());
    assert!(log.finished_before("db-primary", "api", Phase::Setup));
    assert!(log.finished_before("db-replica", "api", Phase::Setup));
    Ok(())
}

#[tokio::test]
async fn adding_an_existing_key_is_a_no_op() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add(MockService::new("db", &log))?;
    boot.add_with_key(MockService::new("other", &log), "db")?;

    assert_eq!(boot.components().len(), 1);
    Ok(())
}

#[tokio::test]
async fn empty_key_is_rejected() {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    let res = boot.add_with_key(MockService::new("db", &log), "  ");
    assert!(matches!(res, Err(BootdagError::ConfigError(_))));
}

#[tokio::test]
async fn unknown_key_reference_fails_init() {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add(MockService::new("api", &log).after("missing"))
        .expect("add");

    match with_timeout(boot.init()).await {
        Err(BootdagError::TaskNotFound(msg)) => assert!(msg.contains("missing")),
        other => panic!("expected TaskNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn cyclic_declarations_fail_init() {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add(MockService::new("a", &log).after("b")).expect("add a");
    boot.add(MockService::new("b", &log).after("a")).expect("add b");

    match with_timeout(boot.init()).await {
        Err(BootdagError::DagCycle(msg)) => assert!(msg.contains("cycle detected")),
        other => panic!("expected DagCycle, got {other:?}"),
    }
}

#[tokio::test]
async fn self_declaration_fails_init() {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add(MockService::new("a", &log).after("a")).expect("add");

    let res = with_timeout(boot.init()).await;
    assert!(matches!(res, Err(BootdagError::ConfigError(_))));
}

#[tokio::test]
async fn phases_must_run_in_order() {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add(MockService::new("a", &log)).expect("add");

    let res = with_timeout(boot.setup()).await;
    assert!(matches!(
        res,
        Err(BootdagError::PhaseNotReached {
            phase: Phase::Setup,
            required: Phase::Init
        })
    ));

    let res = with_timeout(boot.run_phase(Phase::Start)).await;
    assert!(matches!(res, Err(BootdagError::PhaseNotReached { .. })));
}

#[tokio::test]
async fn stop_before_setup_does_nothing() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add(MockService::new("a", &log))?;

    with_timeout(boot.init()).await?;
    with_timeout(boot.stop()).await?;

    assert!(log.started(Phase::Stop).is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_setup_limits_start_and_stop_to_survivors() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(0);
    boot.add(MockService::new("cache", &log))?;
    boot.add(
        MockService::new("api", &log)
            .depends_on(MockService::new("db", &log).fail_on(Phase::Setup)),
    )?;

    with_timeout(boot.init()).await?;
    let res = with_timeout(boot.setup()).await;
    assert!(matches!(res, Err(BootdagError::Callback { ref task, .. }) if task == "db"));

    with_timeout(boot.start()).await?;
    with_timeout(boot.stop()).await?;

    assert_eq!(log.finished(Phase::Start), vec!["cache"]);
    assert_eq!(log.finished(Phase::Stop), vec!["cache"]);
    assert_eq!(log.count("api", Phase::Setup, EventKind::Started), 0);
    Ok(())
}

#[tokio::test]
async fn pre_started_services_skip_earlier_phases() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add_with_status(MockService::new("legacy", &log), None, Phase::Start)?;
    boot.add(MockService::new("api", &log).after("legacy"))?;

    with_timeout(boot.bring_up()).await?;
    with_timeout(boot.stop()).await?;

    assert_eq!(log.count("legacy", Phase::Setup, EventKind::Started), 0);
    assert_eq!(log.count("legacy", Phase::Start, EventKind::Started), 0);
    assert_eq!(log.finished(Phase::Stop), vec!["api", "legacy"]);
    Ok(())
}

#[tokio::test]
async fn serving_futures_end_after_stop() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add(MockService::new("server", &log).serving())?;

    with_timeout(boot.bring_up()).await?;
    assert_eq!(log.count("server", Phase::Start, EventKind::ServeEnded), 0);

    with_timeout(boot.stop()).await?;

    let stopped = log.index_of("server", Phase::Stop, EventKind::Finished);
    let ended = log.index_of("server", Phase::Start, EventKind::ServeEnded);
    assert!(stopped.is_some() && ended.is_some());
    assert!(stopped < ended);
    Ok(())
}

#[tokio::test]
async fn phase_timeout_interrupts_a_slow_phase() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = Bootstrap::new(BootstrapConfig {
        concurrency: Concurrency::Unbounded,
        phase_timeout: Some(ms(50)),
        shutdown_timeout: Duration::from_secs(1),
    });
    boot.add(MockService::new("slow", &log).delay_in(Phase::Setup, ms(500)))?;
    boot.add(MockService::new("after", &log).after("slow"))?;

    with_timeout(boot.init()).await?;
    let res = with_timeout(boot.setup()).await;

    assert!(matches!(
        res,
        Err(BootdagError::Timeout { phase: Phase::Setup, .. })
    ));
    assert_eq!(log.count("after", Phase::Setup, EventKind::Started), 0);
    Ok(())
}

#[tokio::test]
async fn interrupter_cancels_a_running_phase() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add(MockService::new("slow", &log).delay_in(Phase::Setup, ms(300)))?;
    boot.add(MockService::new("after", &log).after("slow"))?;
    with_timeout(boot.init()).await?;

    let interrupter = boot.interrupter();
    tokio::spawn(async move {
        tokio::time::sleep(ms(50)).await;
        interrupter.cancel();
    });

    let res = with_timeout(boot.setup()).await;
    assert!(matches!(res, Err(BootdagError::Cancelled { .. })));
    assert_eq!(log.count("after", Phase::Setup, EventKind::Started), 0);
    Ok(())
}

#[tokio::test]
async fn failing_stop_hook_does_not_skip_independent_services() -> TestResult {
    init_tracing();
    for concurrency in [0, -1] {
        let log = ExecutionLog::new();
        let mut boot = bootstrap(concurrency);
        boot.add(MockService::new("a", &log).fail_on(Phase::Stop))?;
        boot.add(MockService::new("b", &log))?;
        boot.add(MockService::new("c", &log))?;

        with_timeout(boot.bring_up()).await?;
        let res = with_timeout(boot.stop()).await;

        assert!(
            matches!(res, Err(BootdagError::Callback { ref task, phase: Phase::Stop, .. }) if task == "a"),
            "concurrency {concurrency}: {res:?}"
        );
        let mut stopped = log.finished(Phase::Stop);
        stopped.sort();
        assert_eq!(stopped, vec!["b", "c"], "concurrency {concurrency}");
    }
    Ok(())
}

#[tokio::test]
async fn service_set_up_during_an_interrupt_is_still_stopped() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add(MockService::new("db", &log).delay_in(Phase::Setup, ms(200)))?;
    with_timeout(boot.init()).await?;

    let interrupter = boot.interrupter();
    tokio::spawn(async move {
        tokio::time::sleep(ms(50)).await;
        interrupter.cancel();
    });

    let res = with_timeout(boot.setup()).await;
    assert!(matches!(res, Err(BootdagError::Cancelled { phase: Phase::Setup })));

    with_timeout(boot.stop()).await?;
    assert_eq!(log.finished(Phase::Setup), vec!["db"]);
    assert_eq!(log.finished(Phase::Stop), vec!["db"]);
    Ok(())
}

#[tokio::test]
async fn run_until_shutdown_tears_everything_down() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add(
        MockService::new("api", &log)
            .serving()
            .depends_on(MockService::new("db", &log)),
    )?;

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let trigger = {
        let log = log.clone();
        tokio::spawn(async move {
            // Wait for bring-up before requesting shutdown.
            while log.count("api", Phase::Start, EventKind::Finished) == 0 {
                tokio::time::sleep(ms(5)).await;
            }
            let _ = tx.send(());
        })
    };

    with_timeout(boot.run_until_shutdown(async {
        let _ = rx.await;
    }))
    .await?;
    trigger.await?;

    assert_eq!(log.finished(Phase::Stop), vec!["api", "db"]);
    assert_eq!(log.count("api", Phase::Start, EventKind::ServeEnded), 1);
    assert!(boot.components().is_empty());
    Ok(())
}

#[tokio::test]
async fn run_until_shutdown_reports_bring_up_failure() {
    init_tracing();
    let log = ExecutionLog::new();
    let mut boot = bootstrap(-1);
    boot.add(MockService::new("ok", &log)).expect("add ok");
    boot.add(MockService::new("bad", &log).fail_on(Phase::Start))
        .expect("add bad");

    // Never resolves: a failed bring-up must not wait for it.
    let res = with_timeout(boot.run_until_shutdown(std::future::pending::<()>())).await;

    assert!(matches!(res, Err(BootdagError::Callback { ref task, .. }) if task == "bad"));
    assert_eq!(log.count("ok", Phase::Stop, EventKind::Finished), 1);
    assert_eq!(log.count("bad", Phase::Stop, EventKind::Finished), 1);
}

/// Records the dependency instances its hooks are handed.
struct Probe {
    log: ExecutionLog,
    seen: Arc<Mutex<Vec<TaskName>>>,
}

impl Service for Probe {
    fn name(&self) -> TaskName {
        "probe".to_string()
    }

    fn init(&self, _ctx: PhaseContext) -> BoxFuture<'_, anyhow::Result<Vec<Dependency>>> {
        let db = MockService::new("db", &self.log);
        Box::pin(async move { Ok(vec![Dependency::on(db)]) })
    }

    fn setup(&self, ctx: PhaseContext) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            let names: Vec<TaskName> = ctx.dependencies().iter().map(|d| d.name()).collect();
            *self.seen.lock().unwrap() = names;
            anyhow::ensure!(ctx.dependency("db").is_some(), "db not resolved");
            Ok(())
        })
    }
}

#[tokio::test]
async fn hooks_see_resolved_dependencies() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut boot = bootstrap(-1);
    boot.add(Probe {
        log: log.clone(),
        seen: Arc::clone(&seen),
    })?;

    with_timeout(boot.bring_up()).await?;

    assert_eq!(*seen.lock().unwrap(), vec!["db".to_string()]);
    Ok(())
}
