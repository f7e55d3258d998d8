//! Error types for the cluster engine.
//!
//! One enum covers every failure mode a component in this crate can raise.
//! Variants map directly onto the error kinds used for retry and exit-code
//! decisions: `ConfigError`, `AdapterError`, `NetworkError`, `StateError`,
//! `AuthError`, `Cancelled`, `Internal`.

use std::time::Duration;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every error the cluster engine can surface.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad YAML, an unresolved `extends`/`include`, a merge cycle, or an
    /// unknown key under a strict schema. Fatal before any external call.
    #[error("config error in {context}: {message}")]
    Config {
        /// Where the problem was found (file path, machine name, ...).
        context: String,
        /// Human-readable detail.
        message: String,
    },

    /// An external tool was not found, exited non-zero, or produced output
    /// this crate could not parse.
    #[error("{tool} failed: {message}")]
    Adapter {
        /// The tool that failed (`docker`, `docker-machine`, `ssh`, ...).
        tool: String,
        /// Detail, usually including the exit code or parse failure.
        message: String,
        /// Captured stdout, if any.
        stdout: String,
        /// Captured stderr, if any.
        stderr: String,
    },

    /// The external tool was not found on `PATH` or at the configured path.
    #[error("{tool} binary not found: {path}")]
    ToolNotFound {
        /// Logical tool name.
        tool: String,
        /// Path that was probed.
        path: String,
    },

    /// A command exceeded its allotted timeout.
    #[error("{tool} timed out after {timeout:?}")]
    AdapterTimeout {
        /// Logical tool name.
        tool: String,
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// SSH unreachable, connection refused, or a transport-level timeout.
    #[error("network error reaching {host}: {message}")]
    Network {
        /// Host or machine name involved.
        host: String,
        /// Detail.
        message: String,
    },

    /// An operation was attempted from a state that does not allow it, or a
    /// state marker on disk is inconsistent with observed reality.
    #[error("invalid state transition for {machine}: {message}")]
    State {
        /// The machine whose state machine rejected the transition.
        machine: String,
        /// Detail.
        message: String,
    },

    /// Registry login or credential handling failed. Never retried.
    #[error("auth failed for {server}: {message}")]
    Auth {
        /// The registry server.
        server: String,
        /// Detail.
        message: String,
    },

    /// The operation was cancelled before completion.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A bug, or an invariant this crate assumes but didn't hold.
    #[error("internal error: {0}")]
    Internal(String),

    /// Filesystem I/O failure with operation context attached.
    #[error("io error during {operation}: {source}")]
    Io {
        /// What was being attempted.
        operation: String,
        #[source]
        /// Underlying error.
        source: std::io::Error,
    },

    /// YAML parsing/serialization failure.
    #[error("yaml error in {context}: {source}")]
    Yaml {
        /// Where the YAML came from.
        context: String,
        #[source]
        /// Underlying error.
        source: serde_yaml_ng::Error,
    },
}

impl Error {
    /// Build a `Config` error.
    pub fn config(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Build an `Adapter` error from a finished (non-zero) command.
    pub fn adapter(
        tool: impl Into<String>,
        message: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::Adapter {
            tool: tool.into(),
            message: message.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Build a `ToolNotFound` error.
    pub fn tool_not_found(tool: impl Into<String>, path: impl Into<String>) -> Self {
        Self::ToolNotFound {
            tool: tool.into(),
            path: path.into(),
        }
    }

    /// Build a `Network` error.
    pub fn network(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Build a `State` error.
    pub fn state(machine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::State {
            machine: machine.into(),
            message: message.into(),
        }
    }

    /// Build an `Auth` error.
    pub fn auth(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Build an `Io` error with context.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Build a `Yaml` error with context.
    pub fn yaml(context: impl Into<String>, source: serde_yaml_ng::Error) -> Self {
        Self::Yaml {
            context: context.into(),
            source,
        }
    }

    /// Whether this error belongs to a class that is safe to retry
    /// transparently (§7: transient adapter/network failures).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::AdapterTimeout { .. } => true,
            Self::Adapter { message, .. } => is_transient_message(message),
            Self::Io { .. } => true,
            _ => false,
        }
    }

    /// Error kind, used for per-machine summary reporting (§7).
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "ConfigError",
            Self::Adapter { .. } | Self::ToolNotFound { .. } | Self::AdapterTimeout { .. } => {
                "AdapterError"
            }
            Self::Network { .. } => "NetworkError",
            Self::State { .. } => "StateError",
            Self::Auth { .. } => "AuthError",
            Self::Cancelled(_) => "Cancelled",
            Self::Internal(_) | Self::Io { .. } | Self::Yaml { .. } => "Internal",
        }
    }
}

/// Known-transient substrings from external tool output (§7): connection
/// refused, i/o timeout, and the VirtualBox "VM is restarting" message.
fn is_transient_message(message: &str) -> bool {
    const PATTERNS: &[&str] = &[
        "connection refused",
        "i/o timeout",
        "vm is restarting",
        "no route to host",
        "connection reset",
    ];
    let lower = message.to_lowercase();
    PATTERNS.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_not_recoverable() {
        let err = Error::config("cluster.yml", "unresolved extends: foo");
        assert_eq!(err.category(), "ConfigError");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn auth_errors_are_never_recoverable() {
        let err = Error::auth("registry.example.com", "bad credentials");
        assert_eq!(err.category(), "AuthError");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn transient_adapter_errors_are_recoverable() {
        let err = Error::adapter("docker-machine", "dial tcp: connection refused", "", "");
        assert!(err.is_recoverable());

        let err = Error::adapter("VBoxManage", "VM is restarting", "", "");
        assert!(err.is_recoverable());
    }

    #[test]
    fn permanent_adapter_errors_are_not_recoverable() {
        let err = Error::adapter("docker", "no such image", "", "");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn network_errors_are_always_recoverable() {
        assert!(Error::network("worker-1", "ssh: handshake timeout").is_recoverable());
    }
}
