//! Async process execution for the external tools this crate drives.
//!
//! A single [`ProcessExecutor`] core handles spawn/timeout/stream plumbing;
//! [`ToolAdapter`] wraps it per tool (`docker`, `docker-machine`,
//! `docker-compose`, `VBoxManage`, `ssh`, `scp`/`rsync`) so each gets its own
//! binary-path resolution and default arguments while sharing one executor
//! shape, per the Tool Adapter contract (§6).

use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::errors::{Error, Result};

/// Log at the machinery "NOTICE" level (§7): mapped onto `tracing::info!`
/// with a `kind` field, since `tracing` has no native `NOTICE` level but the
/// six-level vocabulary (`DEBUG`, `INFO`, `NOTICE`, `WARN`, `ERROR`, `FATAL`)
/// is preserved in emitted fields.
pub fn notice(tool: Tool, message: &str) {
    info!(tool = %tool, kind = "NOTICE", "{message}");
}

/// Log at the machinery "FATAL" level (§7): mapped onto `tracing::error!`
/// with a `kind` field, for conditions from which the current command cannot
/// recover (spawn failure, timeout exhaustion).
pub fn fatal(tool: Tool, message: &str) {
    error!(tool = %tool, kind = "FATAL", "{message}");
}

/// Logical identity of an external tool this crate shells out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// `docker`
    Docker,
    /// `docker-machine`
    DockerMachine,
    /// `docker-compose`
    DockerCompose,
    /// `VBoxManage`
    VBoxManage,
    /// `ssh`
    Ssh,
    /// `scp`
    Scp,
    /// `rsync`
    Rsync,
}

impl Tool {
    /// The default binary name looked up on `PATH` for this tool.
    #[must_use]
    pub fn binary_name(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::DockerMachine => "docker-machine",
            Self::DockerCompose => "docker-compose",
            Self::VBoxManage => "VBoxManage",
            Self::Ssh => "ssh",
            Self::Scp => "scp",
            Self::Rsync => "rsync",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.binary_name())
    }
}

/// Configuration for a single command execution.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Command timeout (`None` for no timeout).
    pub timeout: Option<Duration>,
    /// Environment variables to set, merged over the adapter's own.
    pub environment: HashMap<String, String>,
    /// Working directory for the command.
    pub working_dir: Option<std::path::PathBuf>,
    /// Whether to capture stdout.
    pub capture_stdout: bool,
    /// Whether to capture stderr.
    pub capture_stderr: bool,
    /// Input data to send to stdin.
    pub stdin_data: Option<Vec<u8>>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            environment: HashMap::new(),
            working_dir: None,
            capture_stdout: true,
            capture_stderr: true,
            stdin_data: None,
        }
    }
}

/// Result of a finished command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code of the process.
    pub exit_code: i32,
    /// Captured stdout (if enabled).
    pub stdout: String,
    /// Captured stderr (if enabled).
    pub stderr: String,
    /// Whether the command was successful (exit code 0).
    pub success: bool,
}

impl CommandOutput {
    /// Build a new command output, deriving `success` from `exit_code`.
    #[must_use]
    pub fn new(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: exit_code == 0,
        }
    }

    /// The combined output (stdout followed by stderr), for diagnostics.
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Streaming command output: line channels plus the child handle, used by
/// the Image Pre-seeder (§4.7) to surface `docker pull`/`save`/`load`
/// progress as it happens.
pub struct StreamingOutput {
    /// Receiver for stdout lines.
    pub stdout: mpsc::Receiver<Result<String>>,
    /// Receiver for stderr lines.
    pub stderr: mpsc::Receiver<Result<String>>,
    /// Handle to the child process.
    pub child: Child,
}

/// Async process executor shared by all [`ToolAdapter`]s.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    /// Path to the tool's binary.
    pub binary_path: std::path::PathBuf,
    /// Logical tool identity, used in error messages.
    pub tool: Tool,
    default_config: ExecutionConfig,
}

impl ProcessExecutor {
    /// Build an executor for `tool` resolved to `binary_path`.
    #[must_use]
    pub fn new(tool: Tool, binary_path: std::path::PathBuf) -> Self {
        Self {
            binary_path,
            tool,
            default_config: ExecutionConfig::default(),
        }
    }

    /// Override the default timeout applied when a call omits its own.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_config.timeout = Some(timeout);
        self
    }

    /// Run the tool with `args`, waiting for completion and returning the
    /// collected output. Returns [`Error::Adapter`] on non-zero exit and
    /// [`Error::AdapterTimeout`] if `config.timeout` elapses first.
    pub async fn execute(
        &self,
        args: &[String],
        config: Option<ExecutionConfig>,
    ) -> Result<CommandOutput> {
        let config = config.unwrap_or_else(|| self.default_config.clone());
        let command_str = format!("{} {}", self.tool, args.join(" "));

        debug!(tool = %self.tool, "executing: {}", command_str);

        let mut command = Command::new(&self.binary_path);
        command.args(args);

        command.stdin(if config.stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        command.stdout(if config.capture_stdout {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        command.stderr(if config.capture_stderr {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        for (key, value) in &config.environment {
            command.env(key, value);
        }
        if let Some(working_dir) = &config.working_dir {
            command.current_dir(working_dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                fatal(self.tool, &format!("spawn {command_str}: {e}"));
                return Err(Error::io(format!("spawn {command_str}"), e));
            }
        };

        if let Some(stdin_data) = config.stdin_data {
            if let Some(mut stdin) = child.stdin.take() {
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(&stdin_data).await {
                        warn!("failed to write stdin: {e}");
                    }
                    if let Err(e) = stdin.shutdown().await {
                        warn!("failed to close stdin: {e}");
                    }
                });
            }
        }

        let output = if let Some(timeout_duration) = config.timeout {
            match timeout(timeout_duration, self.wait_for_output(child)).await {
                Ok(result) => result?,
                Err(_) => {
                    fatal(self.tool, &format!("{command_str} timed out after {timeout_duration:?}"));
                    return Err(Error::AdapterTimeout {
                        tool: self.tool.to_string(),
                        timeout: timeout_duration,
                    });
                }
            }
        } else {
            self.wait_for_output(child).await?
        };

        trace!(exit_code = output.exit_code, "{command_str} finished");

        if !output.success {
            return Err(Error::adapter(
                self.tool.to_string(),
                format!("exit code {}", output.exit_code),
                output.stdout.clone(),
                output.stderr.clone(),
            ));
        }

        notice(self.tool, &format!("{command_str} completed"));
        Ok(output)
    }

    /// Run the tool with `args`, returning line-by-line stdout/stderr
    /// channels instead of waiting for completion.
    pub async fn execute_streaming(
        &self,
        args: &[String],
        config: Option<ExecutionConfig>,
    ) -> Result<StreamingOutput> {
        let config = config.unwrap_or_else(|| self.default_config.clone());
        let command_str = format!("{} {}", self.tool, args.join(" "));

        debug!(tool = %self.tool, "executing streaming: {}", command_str);

        let mut command = Command::new(&self.binary_path);
        command.args(args);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        for (key, value) in &config.environment {
            command.env(key, value);
        }
        if let Some(working_dir) = &config.working_dir {
            command.current_dir(working_dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::io(format!("spawn streaming {command_str}"), e))?;

        let stdout = child.stdout.take().expect("piped stdout");
        let (stdout_tx, stdout_rx) = mpsc::channel(100);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stdout_tx.send(Ok(line)).await.is_err() {
                    break;
                }
            }
        });

        let stderr = child.stderr.take().expect("piped stderr");
        let (stderr_tx, stderr_rx) = mpsc::channel(100);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr_tx.send(Ok(line)).await.is_err() {
                    break;
                }
            }
        });

        if let Some(stdin_data) = config.stdin_data {
            if let Some(mut stdin) = child.stdin.take() {
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(&stdin_data).await {
                        warn!("failed to write stdin: {e}");
                    }
                    if let Err(e) = stdin.shutdown().await {
                        warn!("failed to close stdin: {e}");
                    }
                });
            }
        }

        Ok(StreamingOutput {
            stdout: stdout_rx,
            stderr: stderr_rx,
            child,
        })
    }

    async fn wait_for_output(&self, mut child: Child) -> Result<CommandOutput> {
        let stdout_handle = child.stdout.take().map(|stdout| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut output = String::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !output.is_empty() {
                        output.push('\n');
                    }
                    output.push_str(&line);
                }
                output
            })
        });

        let stderr_handle = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut output = String::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !output.is_empty() {
                        output.push('\n');
                    }
                    output.push_str(&line);
                }
                output
            })
        });

        let status = child
            .wait()
            .await
            .map_err(|e| Error::io("wait for process completion", e))?;

        let stdout = match stdout_handle {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Internal(format!("stdout collection join error: {e}")))?,
            None => String::new(),
        };
        let stderr = match stderr_handle {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Internal(format!("stderr collection join error: {e}")))?,
            None => String::new(),
        };

        let exit_code = status.code().unwrap_or(-1);
        Ok(CommandOutput::new(exit_code, stdout, stderr))
    }
}

/// A resolved, ready-to-call external tool.
///
/// Owns the sole `ProcessExecutor` for its binary; callers never build a
/// `Command` directly, so argv quoting stays centralised here (Design Note
/// §9).
#[derive(Debug, Clone)]
pub struct ToolAdapter {
    executor: ProcessExecutor,
    default_args: Vec<String>,
}

impl ToolAdapter {
    /// Resolve `tool`'s binary (via `override_path` or `PATH`) and build an
    /// adapter for it.
    pub fn resolve(tool: Tool, override_path: Option<&std::path::Path>) -> Result<Self> {
        let binary_path = match override_path {
            Some(path) => path.to_path_buf(),
            None => find_binary(tool)?,
        };
        Ok(Self {
            executor: ProcessExecutor::new(tool, binary_path),
            default_args: Vec::new(),
        })
    }

    /// Attach arguments prepended to every invocation (e.g. `-H <host>`).
    #[must_use]
    pub fn with_default_args(mut self, args: Vec<String>) -> Self {
        self.default_args = args;
        self
    }

    /// Set the per-call default timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.executor = self.executor.with_default_timeout(timeout);
        self
    }

    /// The tool this adapter drives.
    #[must_use]
    pub fn tool(&self) -> Tool {
        self.executor.tool
    }

    /// The resolved binary path.
    #[must_use]
    pub fn binary_path(&self) -> &std::path::Path {
        &self.executor.binary_path
    }

    /// Run `args` (appended after the adapter's default args) to completion.
    pub async fn run(&self, args: &[String]) -> Result<CommandOutput> {
        let full_args = self.full_args(args);
        self.executor.execute(&full_args, None).await
    }

    /// Run `args` with an explicit execution config.
    pub async fn run_with(
        &self,
        args: &[String],
        config: ExecutionConfig,
    ) -> Result<CommandOutput> {
        let full_args = self.full_args(args);
        self.executor.execute(&full_args, Some(config)).await
    }

    /// Run `args`, streaming stdout/stderr line by line.
    pub async fn run_streaming(
        &self,
        args: &[String],
        config: Option<ExecutionConfig>,
    ) -> Result<StreamingOutput> {
        let full_args = self.full_args(args);
        self.executor.execute_streaming(&full_args, config).await
    }

    fn full_args(&self, args: &[String]) -> Vec<String> {
        let mut full = self.default_args.clone();
        full.extend_from_slice(args);
        full
    }

    /// Verify the tool answers `--version` successfully.
    pub async fn check_available(&self) -> Result<()> {
        let output = self
            .run(&["--version".to_string()])
            .await
            .map_err(|_| Error::tool_not_found(self.tool().to_string(), self.binary_path().display().to_string()))?;
        if !output.success {
            return Err(Error::tool_not_found(
                self.tool().to_string(),
                format!("{} (not executable)", self.binary_path().display()),
            ));
        }
        Ok(())
    }
}

/// Resolve `tool`'s binary via `which`, per the Tool Adapter contract: the
/// crate never assumes a fixed install path.
pub fn find_binary(tool: Tool) -> Result<std::path::PathBuf> {
    which::which(tool.binary_name())
        .map_err(|_| Error::tool_not_found(tool.to_string(), format!("{} not found on PATH", tool.binary_name())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_and_fatal_emit_without_a_subscriber_installed() {
        notice(Tool::Docker, "provisioning complete");
        fatal(Tool::Docker, "could not reach daemon");
    }

    #[test]
    fn tool_binary_names() {
        assert_eq!(Tool::Docker.binary_name(), "docker");
        assert_eq!(Tool::DockerMachine.binary_name(), "docker-machine");
        assert_eq!(Tool::VBoxManage.binary_name(), "VBoxManage");
    }

    #[tokio::test]
    async fn command_output_success_and_combined() {
        let output = CommandOutput::new(0, "out".to_string(), "err".to_string());
        assert!(output.success);
        assert_eq!(output.combined_output(), "out\nerr");

        let stdout_only = CommandOutput::new(0, "out".to_string(), String::new());
        assert_eq!(stdout_only.combined_output(), "out");
    }

    #[test]
    fn execution_config_defaults() {
        let config = ExecutionConfig::default();
        assert!(config.timeout.is_some());
        assert!(config.capture_stdout);
        assert!(config.capture_stderr);
        assert!(config.stdin_data.is_none());
    }

    #[test]
    fn process_executor_carries_tool_and_timeout() {
        let executor = ProcessExecutor::new(Tool::Docker, "/usr/bin/docker".into())
            .with_default_timeout(Duration::from_secs(60));
        assert_eq!(executor.binary_path, std::path::PathBuf::from("/usr/bin/docker"));
        assert_eq!(executor.default_config.timeout, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    #[ignore = "requires docker on PATH"]
    async fn docker_adapter_reports_version() {
        let adapter = ToolAdapter::resolve(Tool::Docker, None).unwrap();
        adapter.check_available().await.unwrap();
    }
}
