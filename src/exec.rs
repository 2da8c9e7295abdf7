//! Typed command execution
//!
//! Every local and remote action goes through a [`CommandRunner`]: a command
//! is described by a [`CommandSpec`] (program, arguments, optional stdin) and
//! yields a [`CommandOutput`] with the exit status and captured streams.
//! Success is decided from the exit status, never by scraping output.

use crate::error::{CapturedOutput, ExitStatus, ProvisionError, Result};
use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

/// A command to execute: program, arguments and optional stdin payload
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Arguments, passed without shell interpretation
    pub args: Vec<String>,
    /// Bytes written to the child's stdin
    pub stdin: Option<Vec<u8>>,
    /// Stdin carries secret material and must not be logged
    pub sensitive_stdin: bool,
    /// Stdout carries secret material and must not be logged
    pub sensitive_stdout: bool,
}

impl CommandSpec {
    /// Create a command with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            sensitive_stdin: false,
            sensitive_stdout: false,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed the given bytes on stdin
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Feed secret bytes on stdin (redacted in Debug output)
    pub fn secret_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self.sensitive_stdin = true;
        self
    }

    /// Mark stdout as secret so it is never traced
    pub fn secret_output(mut self) -> Self {
        self.sensitive_stdout = true;
        self
    }

    /// The command line as a single display string
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stdin = match (&self.stdin, self.sensitive_stdin) {
            (None, _) => None,
            (Some(_), true) => Some("[REDACTED]".to_string()),
            (Some(bytes), false) => Some(format!("{} bytes", bytes.len())),
        };
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stdin", &stdin)
            .finish()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status
    pub status: ExitStatus,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: ExitStatus::Code(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: ExitStatus::Code(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with code 0
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Convert a non-zero exit into a [`ProvisionError::Command`]
    pub fn check(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(ProvisionError::Command {
            command: spec.command_line(),
            status: self.status,
            output: CapturedOutput {
                stdout: self.stdout,
                stderr: self.stderr,
            },
        })
    }
}

/// Executes commands and captures their result
///
/// A non-zero exit is returned as a normal [`CommandOutput`]; only failure to
/// start the program is an error. Callers use [`RunChecked::run_checked`]
/// when any non-zero exit is fatal.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    /// Run a command to completion
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Convenience for runners where a non-zero exit is fatal
pub trait RunChecked {
    /// Run a command and fail on non-zero exit
    fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> RunChecked for R {
    fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.run(spec)?.check(spec)
    }
}

/// Runs commands on the local host with `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a new system runner
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec, "Executing command");

        let spawn_error = |source| ProvisionError::Spawn {
            command: spec.command_line(),
            source,
        };

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        if let Some(input) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input).map_err(spawn_error)?;
            }
        }

        let output = child.wait_with_output().map_err(spawn_error)?;
        let result = CommandOutput {
            status: output.status.into(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        let stdout = if spec.sensitive_stdout {
            "[REDACTED]"
        } else {
            result.stdout.trim()
        };
        debug!(
            command = %spec,
            status = %result.status,
            stdout = %stdout,
            stderr = %result.stderr.trim(),
            "Command finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_rendering() {
        let spec = CommandSpec::new("wg-quick").args(["down", "wg0"]);
        assert_eq!(spec.command_line(), "wg-quick down wg0");
        assert_eq!(spec.to_string(), "wg-quick down wg0");
    }

    #[test]
    fn test_secret_stdin_redacted() {
        let spec = CommandSpec::new("wg").arg("pubkey").secret_stdin("very-secret");
        let debug_str = format!("{:?}", spec);
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("very-secret"));
    }

    #[test]
    fn test_check_failure_carries_streams() {
        let spec = CommandSpec::new("false");
        let err = CommandOutput::failed(3, "boom").check(&spec).unwrap_err();
        match err {
            ProvisionError::Command { command, status, output } => {
                assert_eq!(command, "false");
                assert_eq!(status, ExitStatus::Code(3));
                assert_eq!(output.stderr, "boom");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_run_checked_uses_run() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.program == "true")
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("")));
        assert!(runner.run_checked(&CommandSpec::new("true")).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_output() {
        let runner = SystemRunner::new();
        let spec = CommandSpec::new("sh").args(["-c", "cat; echo err >&2; exit 4"]).stdin("hello");
        let output = runner.run(&spec).unwrap();
        assert_eq!(output.status, ExitStatus::Code(4));
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn test_system_runner_missing_program() {
        let runner = SystemRunner::new();
        let err = runner
            .run(&CommandSpec::new("/nonexistent/definitely-not-here"))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Spawn { .. }));
    }
}
