mod common;
use crate::common::*;

use std::sync::Arc;

use bootdag::errors::BootdagError;
use bootdag::task::{Component, Task};
use bootdag::types::Phase;
use tokio_util::sync::CancellationToken;

fn component(log: &ExecutionLog, name: &str, status: Phase) -> Arc<Component> {
    let service = MockService::new(name, log).delay(ms(20));
    Arc::new(Component::new(Arc::new(service), name, status))
}

#[tokio::test]
async fn second_run_of_a_phase_is_already_ran() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let a = component(&log, "a", Phase::Init);

    a.run(CancellationToken::new(), Phase::Setup).await?;
    let again = a.run(CancellationToken::new(), Phase::Setup).await;

    assert!(matches!(
        again,
        Err(BootdagError::AlreadyRan { ref task, phase: Phase::Setup }) if task == "a"
    ));
    assert_eq!(log.count("a", Phase::Setup, EventKind::Started), 1);
    assert_eq!(a.status(), Phase::Setup);
    Ok(())
}

#[tokio::test]
async fn concurrent_runs_execute_the_hook_once() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let a = component(&log, "a", Phase::Init);

    let (first, second) = tokio::join!(
        a.run(CancellationToken::new(), Phase::Setup),
        a.run(CancellationToken::new(), Phase::Setup),
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Err(BootdagError::AlreadyRan { .. })))
            .count(),
        1
    );
    assert_eq!(log.count("a", Phase::Setup, EventKind::Started), 1);
    Ok(())
}

#[tokio::test]
async fn earlier_phases_are_skipped_once_passed() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let a = component(&log, "a", Phase::Start);

    for phase in [Phase::Init, Phase::Setup, Phase::Start] {
        let res = a.run(CancellationToken::new(), phase).await;
        assert!(matches!(res, Err(BootdagError::AlreadyRan { .. })));
    }
    assert!(log.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn stop_without_setup_skips_the_hook() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let a = component(&log, "a", Phase::Init);

    let res = a.run(CancellationToken::new(), Phase::Stop).await;

    assert!(matches!(res, Err(BootdagError::AlreadyRan { phase: Phase::Stop, .. })));
    assert_eq!(a.status(), Phase::Stop);
    assert_eq!(log.count("a", Phase::Stop, EventKind::Started), 0);
    Ok(())
}

#[tokio::test]
async fn hook_error_becomes_callback_error() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let service = MockService::new("a", &log).fail_on(Phase::Setup);
    let a = Component::new(Arc::new(service), "a", Phase::Init);

    let res = a.run(CancellationToken::new(), Phase::Setup).await;

    match res {
        Err(err @ BootdagError::Callback { .. }) => {
            let msg = err.to_string();
            assert!(msg.contains("'a'"), "unexpected message: {msg}");
            assert!(msg.contains("setup"), "unexpected message: {msg}");
        }
        other => panic!("expected Callback error, got {other:?}"),
    }
    assert_eq!(a.status(), Phase::Init);
    Ok(())
}

#[test]
fn edges_are_symmetric_and_invert_for_stop() {
    let log = ExecutionLog::new();
    let a = component(&log, "a", Phase::Uninitialized);
    let b = component(&log, "b", Phase::Uninitialized);

    assert!(b.depend_on(&a).unwrap());
    assert!(!b.depend_on(&a).unwrap(), "duplicate edge must be ignored");

    assert_eq!(b.dependencies_for(Phase::Setup), vec!["a"]);
    assert_eq!(a.followers_for(Phase::Setup), vec!["b"]);
    assert!(a.dependencies_for(Phase::Setup).is_empty());

    assert_eq!(a.dependencies_for(Phase::Stop), vec!["b"]);
    assert_eq!(b.followers_for(Phase::Stop), vec!["a"]);
    assert!(b.dependencies_for(Phase::Stop).is_empty());
}

#[test]
fn self_dependency_is_rejected() {
    let log = ExecutionLog::new();
    let a = component(&log, "a", Phase::Uninitialized);

    match a.depend_on(&a) {
        Err(BootdagError::ConfigError(msg)) => assert!(msg.contains("itself")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn lanes_are_resolved_at_registration() {
    let log = ExecutionLog::new();
    let service = MockService::new("a", &log).pooled_in(Phase::Stop);
    let a = Component::new(Arc::new(service), "a", Phase::Uninitialized);

    assert!(a.is_async(Phase::Stop));
    assert!(!a.is_async(Phase::Setup));
}
