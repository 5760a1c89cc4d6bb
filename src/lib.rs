// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod task;
pub mod types;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::engine::{bootstrap_from_config, plan, shutdown_signal};
use crate::types::Concurrency;

pub use crate::engine::{Bootstrap, BootstrapConfig};
pub use crate::errors::BootdagError;
pub use crate::task::{Dependency, PhaseContext, Service, Started};
pub use crate::types::{Lanes, Phase};

/// High-level entry point used by `main.rs`.
///
/// Loads the config, registers a command service per task and either prints
/// the plan (`--dry-run`), cycles once (`--once`) or runs until Ctrl-C.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;

    if args.dry_run {
        print_dry_run(&cfg)?;
        return Ok(());
    }

    let mut options = cfg.bootstrap_config();
    if let Some(n) = args.concurrency {
        options.concurrency = Concurrency::from(n);
    }
    info!(
        tasks = cfg.task.len(),
        concurrency = %options.concurrency,
        "bootdag starting"
    );

    let mut bootstrap = bootstrap_from_config(&cfg, options)?;

    if args.once {
        let up = bootstrap.bring_up().await;
        let down = bootstrap.stop().await;
        bootstrap.deinit();
        up?;
        down?;
    } else {
        bootstrap.run_until_shutdown(shutdown_signal()).await?;
    }

    info!("bootdag finished");
    Ok(())
}

fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    println!("bootdag dry-run");
    println!("  config.concurrency = {}", cfg.config.concurrency);
    if let Some(ref s) = cfg.config.phase_timeout {
        println!("  config.phase_timeout = {s}");
    }
    if let Some(ref s) = cfg.config.shutdown_timeout {
        println!("  config.shutdown_timeout = {s}");
    }
    println!();

    println!("tasks ({}):", cfg.task.len());
    for (name, task) in cfg.task.iter() {
        println!("  - {name}");
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
        for (label, cmd) in [
            ("init", &task.init),
            ("setup", &task.setup),
            ("start", &task.start),
            ("stop", &task.stop),
        ] {
            if let Some(cmd) = cmd {
                println!("      {label}: {cmd}");
            }
        }
        if task.long_lived {
            println!("      long_lived: true");
        }
        if let Some(ref s) = task.ready_on_stdout {
            println!("      ready_on_stdout: {s}");
        }
        if let Some(ref s) = task.ready_after {
            println!("      ready_after: {s}");
        }
        if !task.pooled.is_empty() {
            println!("      async: {:?}", task.pooled);
        }
    }
    println!();

    println!("phase order:");
    for (phase, order) in plan(cfg)? {
        println!("  {phase}: {}", order.join(" -> "));
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
