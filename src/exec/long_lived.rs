// src/exec/long_lived.rs

use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::sync::oneshot;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// When a long-lived start command counts as up.
#[derive(Debug, Clone)]
pub enum Readiness {
    /// A stdout line matches the pattern.
    Stdout(Regex),
    /// A fixed delay elapsed and the process is still alive.
    After(Duration),
}

impl Readiness {
    pub fn on_stdout(pattern: &str) -> anyhow::Result<Self> {
        let re = Regex::new(pattern)
            .with_context(|| format!("invalid ready_on_stdout regex '{pattern}'"))?;
        Ok(Readiness::Stdout(re))
    }

    pub fn after(spec: &str) -> anyhow::Result<Self> {
        let dur = parse_duration(spec).map_err(|e| anyhow!("invalid ready_after: {e}"))?;
        Ok(Readiness::After(dur))
    }
}

/// Log every line of `reader` at debug level until it closes.
pub fn drain_lines<R>(task: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(task = %task, "{stream}: {line}");
        }
    });
}

/// Consume stdout, firing the returned receiver on the first line matching
/// `pattern`. The receiver errors if stdout closes without a match.
fn spawn_stdout_monitor(
    task: String,
    stdout: ChildStdout,
    pattern: Regex,
) -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut tx = Some(tx);
        let mut lines = BufReader::new(stdout).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            debug!(task = %task, "stdout: {}", line);
            if tx.is_some() && pattern.is_match(&line) {
                debug!(task = %task, "stdout matched ready_on_stdout");
                if let Some(tx) = tx.take() {
                    let _ = tx.send(());
                }
            }
        }

        debug!(task = %task, "stdout monitor ended");
    });

    rx
}

/// Wait until `child` is ready according to `readiness`.
///
/// Fails if the process exits first or `token` is cancelled. Stdout is always
/// consumed, before and after readiness.
pub async fn wait_ready(
    task: &str,
    readiness: &Readiness,
    child: &mut Child,
    stdout: Option<ChildStdout>,
    token: &CancellationToken,
) -> anyhow::Result<()> {
    match readiness {
        Readiness::Stdout(pattern) => {
            let Some(stdout) = stdout else {
                bail!("ready_on_stdout configured but no stdout pipe available");
            };
            let ready = spawn_stdout_monitor(task.to_string(), stdout, pattern.clone());

            tokio::select! {
                res = ready => {
                    res.map_err(|_| anyhow!("stdout closed before matching '{}'", pattern.as_str()))?;
                }
                status = child.wait() => {
                    let status = status.context("waiting for process")?;
                    bail!("exited before becoming ready ({status})");
                }
                _ = token.cancelled() => bail!("cancelled while waiting for readiness"),
            }
        }
        Readiness::After(dur) => {
            if let Some(stdout) = stdout {
                drain_lines(task.to_string(), "stdout", stdout);
            }

            tokio::select! {
                _ = sleep(*dur) => {}
                status = child.wait() => {
                    let status = status.context("waiting for process")?;
                    bail!("exited before ready_after elapsed ({status})");
                }
                _ = token.cancelled() => bail!("cancelled while waiting for readiness"),
            }
        }
    }

    info!(task = %task, "long-lived process is ready");
    Ok(())
}

/// Keep `child` running until it exits on its own or `shutdown` fires, in
/// which case it is killed.
pub async fn serve_until_shutdown(
    task: String,
    mut child: Child,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("waiting for process of task '{task}'"))?;
            if !status.success() {
                bail!("long-lived process exited with code {}", status.code().unwrap_or(-1));
            }
            info!(task = %task, "long-lived process exited");
        }
        _ = shutdown.cancelled() => {
            info!(task = %task, "shutdown requested; killing long-lived process");
            if let Err(e) = child.kill().await {
                warn!(task = %task, error = %e, "failed to kill long-lived process");
            }
        }
    }
    Ok(())
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => minutes(value, 1),
        "h" => minutes(value, 60),
        unit => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

fn minutes(value: u64, per_unit: u64) -> Result<Duration, String> {
    value
        .checked_mul(per_unit * 60)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{value}' is too large"))
}
