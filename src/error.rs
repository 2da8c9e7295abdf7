//! Error types for wg-provision
//!
//! This module defines the error taxonomy used throughout the provisioning
//! workflow. We use `thiserror` for the library error type and `anyhow` only
//! at the top of the binary.

use std::fmt;
use thiserror::Error;

/// Main error type for provisioning operations
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Invalid flag combination or argument value
    #[error("Command line error: {0}")]
    CommandLine(String),

    /// Missing, unreadable or malformed configuration file
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request rejected before any mutation (address, name, key checks)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Client already provisioned
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Removal target or retry prerequisite missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// More than one stanza matches a removal target
    #[error("Ambiguous target: {0}")]
    Ambiguous(String),

    /// A local command exited unsuccessfully
    #[error("Command `{command}` failed with {status}: {output}")]
    Command {
        /// Full command line
        command: String,
        /// Exit status
        status: ExitStatus,
        /// Captured streams
        output: CapturedOutput,
    },

    /// A local command could not be started at all
    #[error("Failed to execute `{command}`: {source}")]
    Spawn {
        /// Full command line
        command: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The hub interface did not come back up after a configuration change
    #[error("Interface {interface} is DOWN after configuration change, all peers are affected: {source}")]
    InterfaceDown {
        /// Hub interface name
        interface: String,
        /// Failure from bringing the interface up
        #[source]
        source: Box<ProvisionError>,
    },

    /// A step on the client host failed after it was found reachable
    #[error("Remote step on {host} failed: {source}")]
    Remote {
        /// Client host
        host: String,
        /// Underlying failure
        #[source]
        source: Box<ProvisionError>,
    },

    /// Connectivity probe from the client reported loss
    #[error("Connectivity check from {host} to {target} failed: {detail}")]
    Connectivity {
        /// Client host
        host: String,
        /// Hub tunnel address
        target: String,
        /// Probe summary
        detail: String,
    },

    /// Another instance holds the lock file
    #[error("Lock error: {0}")]
    Lock(String),

    /// Cancelled by a termination signal
    #[error("Interrupted by signal {0}")]
    Interrupted(i32),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using ProvisionError
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl From<toml::de::Error> for ProvisionError {
    fn from(err: toml::de::Error) -> Self {
        ProvisionError::Config(err.to_string())
    }
}

impl ProvisionError {
    /// Wrap an error as a failure on the given client host
    pub fn remote(host: &str, source: ProvisionError) -> Self {
        ProvisionError::Remote {
            host: host.to_string(),
            source: Box::new(source),
        }
    }

    /// Signal number if this error is a cancellation
    pub fn signal(&self) -> Option<i32> {
        match self {
            Self::Interrupted(signo) => Some(*signo),
            _ => None,
        }
    }

    /// True for errors raised before any state was touched
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::CommandLine(_)
                | Self::Config(_)
                | Self::Validation(_)
                | Self::AlreadyExists(_)
                | Self::NotFound(_)
                | Self::Ambiguous(_)
                | Self::Lock(_)
        )
    }
}

/// Exit status of a finished command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with a code
    Code(i32),
    /// Killed by a signal
    Signal(i32),
}

impl ExitStatus {
    /// Whether the command exited with code 0
    pub fn success(&self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signo) = status.signal() {
                return Self::Signal(signo);
            }
        }
        Self::Code(status.code().unwrap_or(-1))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit status {}", code),
            Self::Signal(signo) => write!(f, "signal {}", signo),
        }
    }
}

/// Captured stdout/stderr of a command, rendered in error messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl fmt::Display for CapturedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => f.write_str("(no output)"),
            (false, true) => write!(f, "stdout: {}", stdout),
            (true, false) => write!(f, "stderr: {}", stderr),
            (false, false) => write!(f, "stdout: {}; stderr: {}", stdout, stderr),
        }
    }
}

/// Process exit code accumulated over one invocation
///
/// Warnings contribute 1, errors contribute 2, a trapped signal replaces
/// both with `128 + signo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitCode {
    /// A warning was reported
    pub warning: bool,
    /// An error was reported
    pub error: bool,
    /// Terminating signal, if any
    pub signal: Option<i32>,
}

impl ExitCode {
    /// Numeric process exit code
    pub fn code(&self) -> i32 {
        if let Some(signo) = self.signal {
            return 128 + signo;
        }
        let mut code = 0;
        if self.warning {
            code += 1;
        }
        if self.error {
            code += 2;
        }
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_sum() {
        assert_eq!(ExitCode::default().code(), 0);
        let warn = ExitCode { warning: true, ..Default::default() };
        assert_eq!(warn.code(), 1);
        let err = ExitCode { error: true, ..Default::default() };
        assert_eq!(err.code(), 2);
        let both = ExitCode { warning: true, error: true, signal: None };
        assert_eq!(both.code(), 3);
    }

    #[test]
    fn test_exit_code_signal_wins() {
        let code = ExitCode { warning: true, error: true, signal: Some(15) };
        assert_eq!(code.code(), 143);
    }

    #[test]
    fn test_command_error_includes_output() {
        let err = ProvisionError::Command {
            command: "wg genkey".to_string(),
            status: ExitStatus::Code(1),
            output: CapturedOutput {
                stdout: String::new(),
                stderr: "wg: not found\n".to_string(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("wg genkey"));
        assert!(msg.contains("exit status 1"));
        assert!(msg.contains("stderr: wg: not found"));
    }

    #[test]
    fn test_precondition_classification() {
        assert!(ProvisionError::Validation("x".into()).is_precondition());
        assert!(!ProvisionError::Interrupted(2).is_precondition());
        assert_eq!(ProvisionError::Interrupted(2).signal(), Some(2));
    }
}
