//! Shell command execution with a timeout and an output cap.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use operarius_core::tools::{
    object_schema, string_property, Tool, ToolError, ToolOutput, ToolResult,
};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{optional_str, required_str};
use crate::path_guard::PathGuard;

/// Runs a command through the platform shell.
///
/// The command is killed when it exceeds the timeout or when stdout and
/// stderr together grow past the output limit; both cases are errors.
pub struct ShellExecTool {
    timeout: Duration,
    max_output_bytes: usize,
    guard: Option<PathGuard>,
}

impl ShellExecTool {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
            guard: None,
        }
    }

    /// Require a `cwd` argument to be inside the allowed directories.
    pub fn with_guard(mut self, guard: PathGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    fn command(command: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }

    async fn run(&self, command: &str, cwd: Option<&str>) -> ToolResult<Value> {
        let mut cmd = Self::command(command);
        if let Some(cwd) = cwd {
            let dir = match &self.guard {
                Some(guard) => guard.resolve(cwd)?,
                None => cwd.into(),
            };
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ToolError::Execution(format!("failed to spawn shell: {e}")))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Execution("stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ToolError::Execution("stderr not captured".to_string()))?;

        let limit = self.max_output_bytes;
        let work = async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let mut out_open = true;
            let mut err_open = true;
            while out_open || err_open {
                tokio::select! {
                    read = read_chunk(&mut stdout, &mut out), if out_open => out_open = read? > 0,
                    read = read_chunk(&mut stderr, &mut err), if err_open => err_open = read? > 0,
                }
                if out.len() + err.len() > limit {
                    child.start_kill()?;
                    return Ok(None);
                }
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>(Some((status, out, err)))
        };

        let (status, out, err) = match timeout(self.timeout, work).await {
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                warn!(command, timeout_ms, "Shell command timed out");
                return Err(ToolError::Timeout(timeout_ms));
            }
            Ok(Err(e)) => return Err(ToolError::Execution(e.to_string())),
            Ok(Ok(None)) => {
                warn!(command, limit, "Shell command output exceeded limit");
                return Err(ToolError::OutputLimit(limit));
            }
            Ok(Ok(Some(result))) => result,
        };

        debug!(command, code = ?status.code(), "Shell command finished");
        let stdout = String::from_utf8_lossy(&out);
        let stderr = String::from_utf8_lossy(&err);
        if !status.success() {
            return Err(ToolError::Execution(format!(
                "command exited with {}: {}",
                status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| format!("code {c}")),
                stderr.trim()
            )));
        }

        Ok(json!({
            "command": command,
            "exit_code": status.code(),
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, sink: &mut Vec<u8>) -> std::io::Result<usize> {
    let mut buf = [0u8; 8192];
    let n = reader.read(&mut buf).await?;
    sink.extend_from_slice(&buf[..n]);
    Ok(n)
}

#[async_trait]
impl Tool for ShellExecTool {
    fn name(&self) -> &str {
        "shell_exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command with a timeout and an output size limit"
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "command": string_property("Command line to run"),
                "cwd": string_property("Working directory"),
            }),
            vec!["command".to_string()],
        )
    }

    async fn execute(&self, args: Value) -> ToolResult<ToolOutput> {
        let command = required_str(&args, "command")?;
        if command.trim().is_empty() {
            return Err(ToolError::InvalidArguments("command must not be empty".to_string()));
        }
        let cwd = optional_str(&args, "cwd");
        self.run(command, cwd).await.map(ToolOutput::success)
    }
}
