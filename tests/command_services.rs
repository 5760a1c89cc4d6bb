#![cfg(unix)]

mod common;
use crate::common::*;

use std::time::{Duration, Instant};

use bootdag::BootstrapConfig;
use bootdag::config::ConfigFile;
use bootdag::engine::{bootstrap_from_config, plan};
use bootdag::errors::BootdagError;
use bootdag::types::{Concurrency, Phase};
use bootdag_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};

fn options() -> BootstrapConfig {
    BootstrapConfig {
        concurrency: Concurrency::Unbounded,
        phase_timeout: Some(Duration::from_secs(3)),
        shutdown_timeout: Duration::from_secs(2),
    }
}

fn chain_config(out: &str) -> ConfigFile {
    ConfigFileBuilder::new()
        .with_task(
            "db",
            TaskConfigBuilder::new()
                .setup(&format!("echo db-setup >> {out}"))
                .stop(&format!("echo db-stop >> {out}"))
                .build(),
        )
        .with_task(
            "api",
            TaskConfigBuilder::new()
                .after("db")
                .setup(&format!("echo api-setup >> {out}"))
                .start(&format!("echo api-start >> {out}"))
                .stop(&format!("echo api-stop >> {out}"))
                .build(),
        )
        .build()
}

#[tokio::test]
async fn commands_run_in_dependency_order() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out.log");
    let cfg = chain_config(&out.display().to_string());

    let mut boot = bootstrap_from_config(&cfg, options())?;
    with_timeout(boot.bring_up()).await?;
    with_timeout(boot.stop()).await?;

    let lines: Vec<String> = std::fs::read_to_string(&out)?
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(
        lines,
        vec!["db-setup", "api-setup", "api-start", "api-stop", "db-stop"]
    );
    Ok(())
}

#[tokio::test]
async fn failing_command_surfaces_exit_code() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new().setup("exit 7").build())
        .build();

    let mut boot = bootstrap_from_config(&cfg, options())?;
    let res = with_timeout(boot.bring_up()).await;

    match res {
        Err(err @ BootdagError::Callback { phase: Phase::Setup, .. }) => {
            assert!(err.to_string().contains("exited with code 7"), "{err}");
        }
        other => panic!("expected Callback error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn long_lived_start_is_ready_on_stdout_and_killed_on_stop() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_task(
            "server",
            TaskConfigBuilder::new()
                .start("echo booting; echo ready; exec sleep 30")
                .long_lived(true)
                .ready_on_stdout("^ready")
                .build(),
        )
        .build();

    let mut boot = bootstrap_from_config(&cfg, options())?;
    let started = Instant::now();
    with_timeout(boot.bring_up()).await?;
    assert!(started.elapsed() < Duration::from_secs(3));

    with_timeout(boot.stop()).await?;
    assert!(started.elapsed() < Duration::from_secs(4));
    Ok(())
}

#[tokio::test]
async fn long_lived_start_is_ready_after_delay() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_task(
            "worker",
            TaskConfigBuilder::new()
                .start("exec sleep 30")
                .long_lived(true)
                .ready_after("100ms")
                .build(),
        )
        .build();

    let mut boot = bootstrap_from_config(&cfg, options())?;
    let started = Instant::now();
    with_timeout(boot.bring_up()).await?;
    assert!(started.elapsed() >= Duration::from_millis(100));

    with_timeout(boot.stop()).await?;
    Ok(())
}

#[tokio::test]
async fn long_lived_process_exiting_before_ready_fails_start() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_task(
            "flaky",
            TaskConfigBuilder::new()
                .start("exit 3")
                .long_lived(true)
                .ready_on_stdout("^never")
                .build(),
        )
        .build();

    let mut boot = bootstrap_from_config(&cfg, options())?;
    let res = with_timeout(boot.bring_up()).await;

    assert!(matches!(
        res,
        Err(BootdagError::Callback { phase: Phase::Start, .. })
    ));
    Ok(())
}

#[test]
fn plan_lists_setup_forward_and_stop_reversed() -> TestResult {
    let cfg = chain_config("/dev/null");

    let steps = plan(&cfg)?;
    let setup = &steps.iter().find(|(p, _)| *p == Phase::Setup).unwrap().1;
    let stop = &steps.iter().find(|(p, _)| *p == Phase::Stop).unwrap().1;

    assert_eq!(setup, &vec!["db".to_string(), "api".to_string()]);
    assert_eq!(stop, &vec!["api".to_string(), "db".to_string()]);
    Ok(())
}
