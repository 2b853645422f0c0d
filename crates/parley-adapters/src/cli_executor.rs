//! Runs prompts through an agent CLI as a child process.
//!
//! Each call spawns the tool, feeds the prompt, and collects stdout and
//! stderr concurrently. A call that outlives its timeout receives SIGTERM,
//! then a hard kill after a short grace period. The child is also killed if
//! the call's future is dropped.

use crate::cli_backend::CliBackend;
use async_trait::async_trait;
use parley_proto::{Backend, BackendError, InvokeOptions};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// How long a child gets to exit after SIGTERM.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Lines of stderr carried into error messages.
const STDERR_TAIL_LINES: usize = 5;

/// Result of a CLI execution.
#[derive(Debug)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// The last few non-empty stderr lines.
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        lines[start..].join("\n")
    }
}

/// Executor for running prompts through CLI backends.
#[derive(Debug)]
pub struct CliExecutor {
    backend: CliBackend,
}

impl CliExecutor {
    pub fn new(backend: CliBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &CliBackend {
        &self.backend
    }

    /// Runs one prompt to completion or until `timeout` elapses.
    pub async fn execute(
        &self,
        prompt: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> io::Result<ExecutionResult> {
        // The temp file, if any, must live until the child has exited.
        let built = self.backend.build_command(prompt, model);

        let mut command = Command::new(&built.program);
        command
            .args(&built.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if built.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        debug!(command = %built.program, args_count = built.args.len(), "Spawning CLI command");
        let mut child = command.spawn()?;

        if let Some(input) = built.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin.write_all(input.as_bytes()).await?;
            drop(stdin); // Close stdin to signal EOF
        }

        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        // Read both streams concurrently so a full stderr pipe cannot block stdout.
        let collect = async {
            let stdout_future = async {
                let mut buf = Vec::new();
                if let Some(stdout) = stdout_handle.as_mut() {
                    stdout.read_to_end(&mut buf).await?;
                }
                Ok::<_, io::Error>(buf)
            };
            let stderr_future = async {
                let mut buf = Vec::new();
                if let Some(stderr) = stderr_handle.as_mut() {
                    stderr.read_to_end(&mut buf).await?;
                }
                Ok::<_, io::Error>(buf)
            };
            let (out, err) = tokio::try_join!(stdout_future, stderr_future)?;
            let status = child.wait().await?;
            Ok::<_, io::Error>((out, err, status))
        };

        let outcome = tokio::time::timeout(timeout, collect).await;
        match outcome {
            Ok(result) => {
                let (out, err, status) = result?;
                drop(built.temp_file);
                Ok(ExecutionResult {
                    stdout: String::from_utf8_lossy(&out).into_owned(),
                    stderr: String::from_utf8_lossy(&err).into_owned(),
                    exit_code: status.code(),
                    timed_out: false,
                })
            }
            Err(_) => {
                warn!(
                    command = %built.program,
                    timeout_secs = timeout.as_secs(),
                    "Execution timeout reached, sending SIGTERM"
                );
                let status = Self::terminate_child(&mut child).await;
                debug!(status = ?status, "Timed-out child exited");
                Ok(ExecutionResult {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: status.and_then(|s| s.code()),
                    timed_out: true,
                })
            }
        }
    }

    /// Sends SIGTERM, waits out the grace period, then kills.
    async fn terminate_child(child: &mut Child) -> Option<ExitStatus> {
        if send_sigterm(child)
            && let Ok(Ok(status)) = tokio::time::timeout(TERM_GRACE, child.wait()).await
        {
            return Some(status);
        }

        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill child process");
        }
        child.try_wait().ok().flatten()
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    let pid = Pid::from_raw(pid as i32);
    debug!(%pid, "Sending SIGTERM to child process");
    kill(pid, Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

#[async_trait]
impl Backend for CliExecutor {
    fn name(&self) -> &str {
        &self.backend.name
    }

    async fn invoke(&self, prompt: &str, options: &InvokeOptions) -> Result<String, BackendError> {
        let command = &self.backend.command;
        let result = match self
            .execute(prompt, options.model.as_deref(), options.timeout)
            .await
        {
            Ok(result) => result,
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied) => {
                return Err(BackendError::Unavailable(format!("{command}: {e}")));
            }
            Err(e) => return Err(BackendError::Transient(format!("{command}: {e}"))),
        };

        if result.timed_out {
            return Err(BackendError::Timeout(options.timeout));
        }
        if !result.success() {
            let code = result
                .exit_code
                .map_or_else(|| "a signal".to_string(), |c| format!("status {c}"));
            let tail = result.stderr_tail();
            return Err(BackendError::Transient(if tail.is_empty() {
                format!("{command} exited with {code}")
            } else {
                format!("{command} exited with {code}: {tail}")
            }));
        }
        Ok(result.stdout)
    }
}
