//! Watchdog unit installation on the client
//!
//! The archive is unpacked at the client's filesystem root and is expected
//! to carry the unit file (and any helper script) at its final location.

use crate::config::HubContext;
use crate::exec::CommandSpec;
use crate::error::Result;
use crate::remote::RemoteShell;
use crate::runtime::Interrupt;
use tracing::info;

const REMOTE_ARCHIVE: &str = "/tmp/wg-provision-watchdog.tar.gz";

/// Installs and starts the tunnel watchdog unit
pub struct WatchdogInstaller<'a> {
    shell: &'a RemoteShell<'a>,
    hub: &'a HubContext,
    interrupt: &'a Interrupt,
}

impl<'a> WatchdogInstaller<'a> {
    /// Create an installer for the shell's host
    pub fn new(shell: &'a RemoteShell<'a>, hub: &'a HubContext, interrupt: &'a Interrupt) -> Self {
        Self {
            shell,
            hub,
            interrupt,
        }
    }

    /// Unpack the archive, reload systemd, enable and start the unit
    pub fn install(&self) -> Result<()> {
        let unit = self.unit_name();
        info!(host = self.shell.host(), unit = %unit, "Installing watchdog");

        self.interrupt.check()?;
        self.shell.upload(&self.hub.watchdog_archive, REMOTE_ARCHIVE)?;
        let unpacked = self
            .shell
            .exec_checked(&CommandSpec::new("tar").args(["-xzf", REMOTE_ARCHIVE, "-C", "/"]));

        // Remove the archive even when unpacking failed, reporting that first
        let cleanup = self
            .shell
            .exec_checked(&CommandSpec::new("rm").args(["-f", REMOTE_ARCHIVE]));

        unpacked?;
        cleanup?;

        self.interrupt.check()?;
        self.shell
            .exec_checked(&CommandSpec::new("systemctl").arg("daemon-reload"))?;
        self.shell
            .exec_checked(&CommandSpec::new("systemctl").args(["enable", unit.as_str()]))?;
        self.shell
            .exec_checked(&CommandSpec::new("systemctl").args(["restart", unit.as_str()]))?;

        info!(host = self.shell.host(), unit = %unit, "Watchdog running");
        Ok(())
    }

    /// Unit name with an explicit `.service` suffix
    fn unit_name(&self) -> String {
        let unit = self.hub.watchdog_unit.trim();
        if unit.contains('.') {
            unit.to_string()
        } else {
            format!("{}.service", unit)
        }
    }
}
