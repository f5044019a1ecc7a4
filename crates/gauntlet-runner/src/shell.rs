//! Shell-based step execution on the host.

use crate::runner::{KILLED_EXIT_CODE, OutputLine, StepContext, StepResult, StepRunner};
use async_trait::async_trait;
use gauntlet_core::events::LogStream;
use gauntlet_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shell runner for executing commands on the host.
///
/// A bare `bash` or `sh` shell runs the script with `-e -c`, so the first
/// failing command fails the step. Any other shell string is split on
/// whitespace and gets `-c` appended unless it already ends with it.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

/// Program and leading arguments for a shell string.
pub fn shell_invocation(shell: &str) -> (String, Vec<String>) {
    let mut parts = shell.split_whitespace().map(str::to_string);
    let program = parts.next().unwrap_or_else(|| "bash".to_string());
    let mut args: Vec<String> = parts.collect();

    if args.is_empty() && matches!(program.as_str(), "bash" | "sh" | "zsh") {
        args = vec!["-e".to_string(), "-c".to_string()];
    } else if args.last().map(String::as_str) != Some("-c") {
        args.push("-c".to_string());
    }
    (program, args)
}

fn stream_lines<R>(reader: R, stream: LogStream, tx: mpsc::Sender<OutputLine>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut line_number = 0u32;

        while let Ok(Some(line)) = lines.next_line().await {
            line_number += 1;
            let output = OutputLine {
                stream,
                content: line,
                line_number,
                timestamp: chrono::Utc::now(),
            };
            if tx.send(output).await.is_err() {
                break;
            }
        }
    })
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult> {
        let start = std::time::Instant::now();
        let (program, args) = shell_invocation(&ctx.shell);

        info!(step = %ctx.name, shell = %program, working_dir = %ctx.working_dir.display(), "Executing shell command");

        let mut child = Command::new(&program)
            .args(&args)
            .arg(&ctx.command)
            .current_dir(&ctx.working_dir)
            .envs(&ctx.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn `{}`: {}", program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("child stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("child stderr was not captured".into()))?;
        let stdout_handle = stream_lines(stdout, LogStream::Stdout, output_tx.clone());
        let stderr_handle = stream_lines(stderr, LogStream::Stderr, output_tx);

        let deadline = async {
            match ctx.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let (timed_out, cancelled) = tokio::select! {
            status = child.wait() => {
                let _ = stdout_handle.await;
                let _ = stderr_handle.await;

                let status = status
                    .map_err(|e| Error::Internal(format!("Failed to wait for process: {}", e)))?;
                let exit_code = status.code().unwrap_or(KILLED_EXIT_CODE);
                let duration_ms = start.elapsed().as_millis() as u64;
                debug!(step = %ctx.name, exit_code, duration_ms, "Command completed");
                return Ok(StepResult::exited(exit_code, duration_ms));
            }
            _ = deadline => (true, false),
            _ = ctx.cancel.cancelled() => (false, true),
        };

        if timed_out {
            warn!(step = %ctx.name, timeout_secs = ctx.timeout.map(|t| t.as_secs()), "Command timed out, killing process");
        } else {
            info!(step = %ctx.name, "Step cancelled, killing process");
        }
        if let Err(e) = child.kill().await {
            warn!(step = %ctx.name, error = %e, "Failed to kill process");
        }
        stdout_handle.abort();
        stderr_handle.abort();

        Ok(StepResult {
            exit_code: KILLED_EXIT_CODE,
            success: false,
            duration_ms: start.elapsed().as_millis() as u64,
            timed_out,
            cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_core::cancel::{CancelHandle, CancelSignal};
    use indexmap::IndexMap;
    use std::time::Duration;

    fn make_ctx(cmd: &str) -> StepContext {
        StepContext {
            name: "test".to_string(),
            command: cmd.to_string(),
            shell: "bash".to_string(),
            working_dir: std::env::temp_dir(),
            env: IndexMap::new(),
            timeout: None,
            cancel: CancelSignal::never(),
        }
    }

    #[tokio::test]
    async fn test_shell_runner_success() {
        let (tx, mut rx) = mpsc::channel(100);
        let result = ShellRunner::new().execute(&make_ctx("echo hello"), tx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, 0);

        let line = rx.recv().await.unwrap();
        assert_eq!(line.content, "hello");
        assert_eq!(line.stream, LogStream::Stdout);
    }

    #[tokio::test]
    async fn test_shell_runner_failure_exit_code() {
        let (tx, _rx) = mpsc::channel(100);
        let result = ShellRunner::new().execute(&make_ctx("exit 3"), tx).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn test_errexit_stops_script() {
        let (tx, mut rx) = mpsc::channel(100);
        let result = ShellRunner::new()
            .execute(&make_ctx("false\necho unreachable"), tx)
            .await
            .unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_env_and_stderr() {
        let mut ctx = make_ctx("echo \"$KUBE_TAG\" >&2");
        ctx.env.insert("KUBE_TAG".to_string(), "v1.27.3".to_string());
        let (tx, mut rx) = mpsc::channel(100);
        ShellRunner::new().execute(&ctx, tx).await.unwrap();

        let line = rx.recv().await.unwrap();
        assert_eq!(line.content, "v1.27.3");
        assert_eq!(line.stream, LogStream::Stderr);
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let mut ctx = make_ctx("sleep 30");
        ctx.timeout = Some(Duration::from_millis(100));
        let (tx, _rx) = mpsc::channel(100);
        let result = ShellRunner::new().execute(&ctx, tx).await.unwrap();
        assert!(result.timed_out);
        assert_eq!(result.exit_code, KILLED_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let handle = CancelHandle::new();
        let mut ctx = make_ctx("sleep 30");
        ctx.cancel = handle.signal();
        let (tx, _rx) = mpsc::channel(100);

        let run = tokio::spawn(async move { ShellRunner::new().execute(&ctx, tx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(result.cancelled);
        assert!(!result.success);
    }

    #[test]
    fn test_shell_invocation() {
        assert_eq!(
            shell_invocation("bash"),
            ("bash".to_string(), vec!["-e".to_string(), "-c".to_string()])
        );
        assert_eq!(
            shell_invocation("python3"),
            ("python3".to_string(), vec!["-c".to_string()])
        );
        assert_eq!(
            shell_invocation("bash --noprofile -eo pipefail -c"),
            (
                "bash".to_string(),
                vec![
                    "--noprofile".to_string(),
                    "-eo".to_string(),
                    "pipefail".to_string(),
                    "-c".to_string()
                ]
            )
        );
    }
}
