use std::{
    process::{Output, Stdio},
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::warn;

/// Runs `command` to completion, capturing stdout and stderr.
///
/// The child is killed if it is still running when `timeout` elapses.
pub(crate) async fn output_with_timeout(mut command: Command, timeout: Duration) -> Result<Output> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = command.spawn().context("failed to spawn process")?;
    tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .with_context(|| format!("process timed out after {timeout:?}"))?
        .context("failed to wait for process")
}

/// Logs every non-empty line of a child's stderr as a warning.
pub(crate) fn warn_stderr(program: &str, stderr: &[u8]) {
    let stderr = String::from_utf8_lossy(stderr);
    for line in stderr.lines().map(str::trim).filter(|line| !line.is_empty()) {
        warn!("{program}: {line}");
    }
}
