//! Remote shell over ssh/scp
//!
//! Remote commands are typed [`CommandSpec`]s: arguments are quoted for the
//! remote shell here, and the result is the same [`CommandOutput`] used for
//! local commands. Connections use a short connect timeout and batch mode,
//! so an unreachable or key-less host fails fast instead of prompting.

use crate::config::SshConfig;
use crate::error::{ProvisionError, Result};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use std::path::Path;
use tracing::{debug, info};

/// ssh exits with this status when the connection itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Executes commands and copies files on one remote host
pub struct RemoteShell<'a> {
    runner: &'a dyn CommandRunner,
    ssh: &'a SshConfig,
    host: String,
}

impl<'a> RemoteShell<'a> {
    /// Create a shell for `host`
    pub fn new(runner: &'a dyn CommandRunner, ssh: &'a SshConfig, host: impl Into<String>) -> Self {
        Self {
            runner,
            ssh,
            host: host.into(),
        }
    }

    /// Remote host name
    pub fn host(&self) -> &str {
        &self.host
    }

    fn target(&self) -> String {
        format!("{}@{}", self.ssh.user, self.host)
    }

    fn common_options(&self) -> Vec<String> {
        let mut opts = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", self.ssh.connect_timeout().as_secs()),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if let Some(known_hosts) = &self.ssh.known_hosts {
            opts.push("-o".to_string());
            opts.push(format!("UserKnownHostsFile={}", known_hosts.display()));
        }
        if let Some(identity) = &self.ssh.identity {
            opts.push("-i".to_string());
            opts.push(identity.display().to_string());
        }
        opts
    }

    fn ssh_command(&self, remote: &CommandSpec) -> CommandSpec {
        let mut spec = CommandSpec::new("ssh")
            .args(self.common_options())
            .arg("-p")
            .arg(self.ssh.port.to_string())
            .arg(self.target())
            .arg("--")
            .arg(remote_command_line(remote));
        spec.stdin = remote.stdin.clone();
        spec.sensitive_stdin = remote.sensitive_stdin;
        spec.sensitive_stdout = remote.sensitive_stdout;
        spec
    }

    /// Check that the host accepts a non-interactive login
    pub fn is_reachable(&self) -> Result<bool> {
        let output = self.exec(&CommandSpec::new("true"))?;
        if output.success() {
            debug!(host = %self.host, "Host is reachable");
            return Ok(true);
        }
        info!(
            host = %self.host,
            status = %output.status,
            stderr = %output.stderr.trim(),
            "Host is not reachable over ssh"
        );
        Ok(false)
    }

    /// Run a command on the host and return its result
    pub fn exec(&self, remote: &CommandSpec) -> Result<CommandOutput> {
        debug!(host = %self.host, command = %remote, "Running remote command");
        self.runner.run(&self.ssh_command(remote))
    }

    /// Run a command on the host and fail on non-zero exit
    pub fn exec_checked(&self, remote: &CommandSpec) -> Result<CommandOutput> {
        self.exec(remote)?
            .check(remote)
            .map_err(|e| ProvisionError::remote(&self.host, e))
    }

    /// Copy a local file to `remote_path` on the host, preserving its mode
    pub fn upload(&self, local: &Path, remote_path: &str) -> Result<()> {
        let spec = CommandSpec::new("scp")
            .arg("-p")
            .arg("-q")
            .args(self.common_options())
            .arg("-P")
            .arg(self.ssh.port.to_string())
            .arg(local.to_string_lossy().into_owned())
            .arg(format!("{}:{}", self.target(), remote_path));

        debug!(host = %self.host, local = %local.display(), remote = remote_path, "Uploading file");
        self.runner
            .run(&spec)?
            .check(&spec)
            .map_err(|e| ProvisionError::remote(&self.host, e))?;
        Ok(())
    }

    /// Whether an ssh result means the connection failed rather than the command
    pub fn connection_failed(output: &CommandOutput) -> bool {
        output.status == crate::error::ExitStatus::Code(SSH_CONNECTION_FAILURE)
    }
}

/// Quote one argument for a POSIX shell
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Render a command for the remote shell with every word quoted
pub fn remote_command_line(spec: &CommandSpec) -> String {
    std::iter::once(spec.program.as_str())
        .chain(spec.args.iter().map(String::as_str))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}
