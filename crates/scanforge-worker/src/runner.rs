//! Tool runner: spawns one external sub-process and streams its output
//! line by line.
//!
//! Each output line awaits the caller's async callback before the next
//! read, so a slow callback applies backpressure to the reader instead of
//! dropping lines. Timeout and external cancellation both follow the same
//! termination sequence: SIGTERM, a five second grace period, SIGKILL.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{info, warn};

use scanforge_core::model::OutputType;
use scanforge_core::CoreError;

/// Grace period between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Async per-line output callback: `(content, stream)`.
pub type OutputCallback = Arc<dyn Fn(String, OutputType) -> BoxFuture<'static, ()> + Send + Sync>;

/// Cancellation handle for a running tool. Cheap to clone; signalling is
/// sticky and idempotent.
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Runs one external command with output streaming, timeout enforcement
/// and cooperative cancellation.
pub struct ToolRunner {
    command: String,
    timeout: Duration,
    working_dir: PathBuf,
    extra_env: Vec<(String, String)>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl ToolRunner {
    pub fn new(command: impl Into<String>, timeout_seconds: u64, working_dir: PathBuf) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            command: command.into(),
            timeout: Duration::from_secs(timeout_seconds),
            working_dir,
            extra_env: Vec::new(),
            cancel_tx,
            cancel_rx,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.push((key.into(), value.into()));
        self
    }

    /// Handle the owner keeps to cancel the run from outside.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Run the command to completion, streaming every stdout/stderr line
    /// through `callback`. Returns `(exit_code, pid)` on normal exit.
    pub async fn run(mut self, callback: OutputCallback) -> Result<(i32, String), CoreError> {
        tokio::fs::create_dir_all(&self.working_dir)
            .await
            .map_err(|e| {
                CoreError::execution(format!(
                    "failed to create working directory {}: {e}",
                    self.working_dir.display()
                ))
            })?;

        info!(command = %self.command, "executing tool");

        let parent_path = std::env::var("PATH").unwrap_or_default();
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&self.working_dir)
            .env("PATH", format!("/usr/local/bin:/usr/bin:/bin:{parent_path}"))
            .env("DEBIAN_FRONTEND", "noninteractive")
            .kill_on_drop(true);
        for (key, value) in &self.extra_env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            CoreError::execution(format!("failed to spawn '{}': {e}", self.command))
        })?;
        let pid = child
            .id()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::execution("stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CoreError::execution("stderr unavailable"))?;

        let stdout_task = tokio::spawn(read_stream(stdout, OutputType::Stdout, callback.clone()));
        let stderr_task = tokio::spawn(read_stream(stderr, OutputType::Stderr, callback));

        let mut cancel_rx = self.cancel_rx.clone();
        let timed_out;
        let cancelled;

        tokio::select! {
            status = child.wait() => {
                timed_out = false;
                cancelled = false;
                let status = status
                    .map_err(|e| CoreError::execution(format!("wait failed: {e}")))?;
                // Drain whatever the pipes still hold before reporting exit
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                let exit_code = status.code().unwrap_or(-1);
                info!(exit_code, pid, "process completed");
                return Ok((exit_code, pid));
            }
            _ = tokio::time::sleep(self.timeout) => {
                timed_out = true;
                cancelled = false;
            }
            _ = wait_for_cancel(&mut cancel_rx) => {
                timed_out = false;
                cancelled = true;
            }
        }

        if timed_out {
            warn!(timeout = ?self.timeout, "process timed out");
        } else {
            info!("process cancelled");
        }

        graceful_kill(&mut child).await;
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        if cancelled {
            Err(CoreError::Cancelled)
        } else {
            Err(CoreError::Timeout(self.timeout.as_secs()))
        }
    }
}

async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone; never cancelled
            futures::future::pending::<()>().await;
        }
    }
}

async fn read_stream<R: AsyncRead + Unpin>(
    stream: R,
    output_type: OutputType,
    callback: OutputCallback,
) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let content = line.trim_end_matches(['\n', '\r']).to_string();
                callback(content, output_type).await;
            }
            Err(e) => {
                warn!(?output_type, "stream read error: {e}");
                break;
            }
        }
    }
}

/// SIGTERM, wait up to the grace period, then SIGKILL.
async fn graceful_kill(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                Ok(_) => {
                    info!("process terminated");
                    return;
                }
                Err(_) => warn!("process ignored SIGTERM, killing"),
            }
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collecting_callback() -> (OutputCallback, Arc<Mutex<Vec<(String, OutputType)>>>) {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = collected.clone();
        let callback: OutputCallback = Arc::new(move |content, kind| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push((content, kind));
            })
        });
        (callback, collected)
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("scanforge-runner-{name}-{}", uuid::Uuid::now_v7()))
    }

    #[tokio::test]
    async fn test_streams_stdout_and_stderr() {
        let (callback, collected) = collecting_callback();
        let runner = ToolRunner::new("echo out1; echo err1 >&2; echo out2", 30, temp_dir("s"));

        let (exit_code, pid) = runner.run(callback).await.unwrap();
        assert_eq!(exit_code, 0);
        assert!(!pid.is_empty());

        let lines = collected.lock().unwrap();
        let stdout: Vec<&str> = lines
            .iter()
            .filter(|(_, k)| *k == OutputType::Stdout)
            .map(|(c, _)| c.as_str())
            .collect();
        let stderr: Vec<&str> = lines
            .iter()
            .filter(|(_, k)| *k == OutputType::Stderr)
            .map(|(c, _)| c.as_str())
            .collect();
        assert_eq!(stdout, vec!["out1", "out2"]);
        assert_eq!(stderr, vec!["err1"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_code() {
        let (callback, _) = collecting_callback();
        let runner = ToolRunner::new("exit 3", 30, temp_dir("e"));
        let (exit_code, _) = runner.run(callback).await.unwrap();
        assert_eq!(exit_code, 3);
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let (callback, _) = collecting_callback();
        let runner = ToolRunner::new("sleep 30", 1, temp_dir("t"));
        let err = runner.run(callback).await.unwrap_err();
        assert!(matches!(err, CoreError::Timeout(1)));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let (callback, _) = collecting_callback();
        let runner = ToolRunner::new("sleep 30", 60, temp_dir("c"));
        let handle = runner.cancel_handle();

        let run = tokio::spawn(runner.run(callback));
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.cancel();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[tokio::test]
    async fn test_creates_working_directory() {
        let dir = temp_dir("mkdir").join("nested/deep");
        let (callback, collected) = collecting_callback();
        let runner = ToolRunner::new("pwd", 30, dir.clone());
        runner.run(callback).await.unwrap();

        assert!(dir.exists());
        let lines = collected.lock().unwrap();
        assert!(lines[0].0.ends_with("nested/deep"));
    }

    #[tokio::test]
    async fn test_slow_callback_applies_backpressure_without_loss() {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = collected.clone();
        let callback: OutputCallback = Arc::new(move |content, _| {
            let sink = sink.clone();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                sink.lock().unwrap().push(content);
            })
        });

        let runner = ToolRunner::new("seq 1 50", 30, temp_dir("bp"));
        runner.run(callback).await.unwrap();

        let lines = collected.lock().unwrap();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines[0], "1");
        assert_eq!(lines[49], "50");
    }
}
