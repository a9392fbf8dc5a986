//! The native reimplementation of the Worker Launcher's wrapper responsibilities
//! reimplemented natively instead of generating a shell script: write `RUNNING` before spawn, tee the child's
//! combined output, scan it for Docker error signatures on exit, and write the
//! terminal status — all in-process, with no generated shell script.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const DOCKER_ERROR_SIGNATURES: &[&str] = &[
    "failed to create endpoint",
    "exchange full",
    "Internal Server Error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Success,
    Failed,
    DockerError,
    Killed,
}

impl SessionOutcome {
    pub fn status_value(self) -> &'static str {
        match self {
            SessionOutcome::Success => "COMPLETED_SUCCESS",
            SessionOutcome::Failed | SessionOutcome::DockerError | SessionOutcome::Killed => "COMPLETED_FAILED",
        }
    }
}

pub async fn write_status(status_path: &Path, value: &str) -> std::io::Result<()> {
    if let Some(parent) = status_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(status_path, value).await
}

pub fn read_status(status_path: &Path) -> std::io::Result<String> {
    Ok(std::fs::read_to_string(status_path)?.trim().to_string())
}

pub fn status_mtime(status_path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(status_path)?.modified()
}

/// Spawns `cmd`, writes `RUNNING` to `status_path` first, waits for exit or `cancel`,
/// tees combined stdout+stderr into `log_path` if given, scans the captured output for
/// Docker error signatures, and writes the terminal status. Returns the outcome the
/// caller folds into an `AttemptState`.
pub async fn run_supervised(
    mut cmd: Command,
    status_path: PathBuf,
    log_path: Option<PathBuf>,
    cancel: CancellationToken,
) -> std::io::Result<SessionOutcome> {
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    write_status(&status_path, "RUNNING").await?;

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let stdout_task = tokio::spawn(drain(stdout));
    let stderr_task = tokio::spawn(drain(stderr));

    enum Raced {
        Exited(std::io::Result<std::process::ExitStatus>),
        Cancelled,
    }

    let raced = tokio::select! {
        status = child.wait() => Raced::Exited(status),
        _ = cancel.cancelled() => Raced::Cancelled,
    };

    let (killed, exit_success) = match raced {
        Raced::Cancelled => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            (true, false)
        }
        Raced::Exited(status) => (false, status.map(|s| s.success()).unwrap_or(false)),
    };

    let mut combined = stdout_task.await.unwrap_or_default();
    combined.extend(stderr_task.await.unwrap_or_default());

    if let Some(path) = log_path {
        let _ = tokio::fs::write(path, &combined).await;
    }

    let output_text = String::from_utf8_lossy(&combined);
    let docker_error = DOCKER_ERROR_SIGNATURES.iter().any(|sig| output_text.contains(sig));

    let outcome = if killed {
        SessionOutcome::Killed
    } else if docker_error {
        SessionOutcome::DockerError
    } else if exit_success {
        SessionOutcome::Success
    } else {
        SessionOutcome::Failed
    };

    write_status(&status_path, outcome.status_value()).await?;
    Ok(outcome)
}

async fn drain<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_child_writes_success_status() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("status.txt");
        let mut cmd = Command::new("true");
        cmd.kill_on_drop(true);
        let outcome = run_supervised(cmd, status_path.clone(), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, SessionOutcome::Success);
        assert_eq!(read_status(&status_path).unwrap(), "COMPLETED_SUCCESS");
    }

    #[tokio::test]
    async fn failing_child_writes_failed_status() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("status.txt");
        let mut cmd = Command::new("false");
        cmd.kill_on_drop(true);
        let outcome = run_supervised(cmd, status_path.clone(), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, SessionOutcome::Failed);
        assert_eq!(read_status(&status_path).unwrap(), "COMPLETED_FAILED");
    }

    #[tokio::test]
    async fn docker_signature_in_output_overrides_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("status.txt");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo 'failed to create endpoint'; exit 0");
        cmd.kill_on_drop(true);
        let outcome = run_supervised(cmd, status_path.clone(), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, SessionOutcome::DockerError);
        assert_eq!(read_status(&status_path).unwrap(), "COMPLETED_FAILED");
    }

    #[tokio::test]
    async fn cancellation_kills_child_and_marks_killed() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("status.txt");
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        cmd.kill_on_drop(true);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });
        let outcome = run_supervised(cmd, status_path.clone(), None, cancel).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Killed);
    }
}
