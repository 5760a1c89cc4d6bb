mod common;
use crate::common::*;

use bootdag::types::Phase;

#[tokio::test]
async fn serialized_task_is_not_blocked_by_pooled_sleeper() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let x = MockService::new("x", &log)
        .pooled_in(Phase::Setup)
        .delay_in(Phase::Setup, ms(100));
    let y = MockService::new("y", &log);
    let components = wired(vec![x, y], Phase::Init, &[]);

    let sched = scheduler(&components, Phase::Setup, -1);
    with_timeout(sched.run()).await?;

    let y_done = log.index_of("y", Phase::Setup, EventKind::Finished);
    let x_done = log.index_of("x", Phase::Setup, EventKind::Finished);
    assert!(y_done < x_done, "y should finish while x is still sleeping");
    Ok(())
}

#[tokio::test]
async fn serialized_lane_runs_one_task_at_a_time() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let services = ["a", "b", "c"]
        .into_iter()
        .map(|n| MockService::new(n, &log).delay(ms(30)))
        .collect();
    let components = wired(services, Phase::Init, &[]);

    let sched = scheduler(&components, Phase::Setup, 8);
    with_timeout(sched.run()).await?;

    assert_eq!(log.max_concurrent(Phase::Setup), 1);
    // Serialized tasks keep discovery order.
    assert_eq!(log.finished(Phase::Setup), vec!["a", "b", "c"]);
    Ok(())
}

#[tokio::test]
async fn lane_choice_is_per_phase() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let services = ["a", "b"]
        .into_iter()
        .map(|n| {
            MockService::new(n, &log)
                .pooled_in(Phase::Setup)
                .delay(ms(80))
        })
        .collect();
    let components = wired(services, Phase::Init, &[]);

    with_timeout(scheduler(&components, Phase::Setup, 2).run()).await?;
    with_timeout(scheduler(&components, Phase::Stop, 2).run()).await?;

    assert_eq!(log.max_concurrent(Phase::Setup), 2);
    assert_eq!(log.max_concurrent(Phase::Stop), 1);
    Ok(())
}
