//! Client deployment
//!
//! Installs the tunnel software on a reachable client, places its
//! configuration and (re)starts the `wg-quick@` service. An unreachable client
//! is not an error: hub-side state is kept and the operator is told how to
//! finish by hand.

use crate::config::HubContext;
use crate::error::{ProvisionError, Result};
use crate::exec::CommandSpec;
use crate::remote::RemoteShell;
use crate::runtime::{Interrupt, Workspace};
use crate::security::{write_new, SecureFileMode};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// Where the bootstrap installer is placed on the client
const REMOTE_INSTALLER: &str = "/tmp/wg-provision-install.sh";

/// Result of a deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    /// Software installed, configuration placed, service running
    Deployed,
    /// Client could not be reached; manual deployment required
    Unreachable,
}

/// Deploys the tunnel onto a client host
pub struct Deployer<'a> {
    shell: &'a RemoteShell<'a>,
    hub: &'a HubContext,
    workspace: &'a Workspace,
    interrupt: &'a Interrupt,
}

impl<'a> Deployer<'a> {
    /// Create a deployer for the shell's host
    pub fn new(
        shell: &'a RemoteShell<'a>,
        hub: &'a HubContext,
        workspace: &'a Workspace,
        interrupt: &'a Interrupt,
    ) -> Self {
        Self {
            shell,
            hub,
            workspace,
            interrupt,
        }
    }

    /// Deploy `client_config` to the client
    pub fn deploy(&self, client_config: &Path) -> Result<Deployment> {
        let host = self.shell.host();

        self.interrupt.check()?;
        if !self.shell.is_reachable()? {
            self.manual_fallback(client_config);
            return Ok(Deployment::Unreachable);
        }
        info!(host, "Client is reachable, deploying");

        self.interrupt.check()?;
        self.run_installer()?;

        self.interrupt.check()?;
        self.install_config(client_config)?;

        self.interrupt.check()?;
        self.start_service()?;

        info!(host, interface = %self.hub.client_interface, "Client tunnel deployed");
        Ok(Deployment::Deployed)
    }

    fn manual_fallback(&self, client_config: &Path) {
        let service = format!("wg-quick@{}", self.hub.client_interface);
        warn!(
            host = self.shell.host(),
            "Client is unreachable. Hub side is configured; deploy manually: copy {} to {} on the client, \
             then run `systemctl enable {service}` and `systemctl restart {service}`",
            client_config.display(),
            self.hub.remote_config_path(),
        );
    }

    fn run_installer(&self) -> Result<()> {
        let host = self.shell.host();
        info!(host, installer = %self.hub.installer.display(), "Running bootstrap installer");

        self.shell.upload(&self.hub.installer, REMOTE_INSTALLER)?;
        let result = self
            .shell
            .exec_checked(&CommandSpec::new("sh").arg(REMOTE_INSTALLER));

        // Always try to remove the script, but report the installer failure first
        let cleanup = self
            .shell
            .exec_checked(&CommandSpec::new("rm").args(["-f", REMOTE_INSTALLER]));

        result?;
        cleanup?;
        debug!(host, "Bootstrap installer finished and removed");
        Ok(())
    }

    fn install_config(&self, client_config: &Path) -> Result<()> {
        let remote_path = self.hub.remote_config_path();
        let staged = self
            .workspace
            .file(&format!("{}.conf", self.hub.client_interface));

        // Stage under the interface name with owner-only mode; scp -p keeps it
        let contents = fs::read(client_config).map_err(|e| {
            ProvisionError::Io(io::Error::new(
                e.kind(),
                format!(
                    "Cannot read client configuration {}: {}",
                    client_config.display(),
                    e
                ),
            ))
        })?;
        if staged.exists() {
            fs::remove_file(&staged)?;
        }
        write_new(&staged, &contents, SecureFileMode::PrivateKey)?;

        self.shell.upload(&staged, &remote_path)?;
        self.shell
            .exec_checked(&CommandSpec::new("chmod").args(["600", remote_path.as_str()]))?;
        info!(host = self.shell.host(), path = %remote_path, "Client configuration installed");
        Ok(())
    }

    fn start_service(&self) -> Result<()> {
        let interface = self.hub.client_interface.as_str();
        let service = format!("wg-quick@{}", interface);

        self.shell
            .exec_checked(&CommandSpec::new("systemctl").args(["enable", service.as_str()]))?;

        // The interface may have been started outside the service
        let down = self
            .shell
            .exec(&CommandSpec::new("wg-quick").args(["down", interface]))?;
        if !down.success() {
            debug!(interface, "wg-quick down on client reported no running interface");
        }

        self.interrupt.check()?;
        self.shell
            .exec_checked(&CommandSpec::new("systemctl").args(["restart", service.as_str()]))?;
        info!(host = self.shell.host(), service = %service, "Client tunnel service started");
        Ok(())
    }
}
