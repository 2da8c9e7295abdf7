//! Hub tunnel interface refresh
//!
//! A configuration change is applied by a full `wg-quick down` / `wg-quick up`
//! cycle against the modified file, so the running interface always matches
//! the file. Every connected peer sees a short outage while this happens.

use crate::error::{ProvisionError, Result};
use crate::exec::{CommandRunner, CommandSpec, RunChecked};
use std::path::Path;
use tracing::{error, info, warn};

/// Brings the hub interface down and up again
pub struct InterfaceManager<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> InterfaceManager<'a> {
    /// Create a manager on top of a command runner
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Bring the interface described by `config` down
    ///
    /// Returns `false` when the interface was not running.
    pub fn down(&self, interface: &str, config: &Path) -> Result<bool> {
        let spec = wg_quick("down", config);
        let output = self.runner.run(&spec)?;
        if !output.success() {
            warn!(
                interface,
                stderr = %output.stderr.trim(),
                "wg-quick down failed, assuming the interface was not running"
            );
            return Ok(false);
        }
        info!(interface, "Interface brought down");
        Ok(true)
    }

    /// Bring the interface described by `config` up
    pub fn up(&self, interface: &str, config: &Path) -> Result<()> {
        let spec = wg_quick("up", config);
        self.runner.run_checked(&spec)?;
        info!(interface, "Interface brought up");
        Ok(())
    }

    /// Re-establish the interface from the (modified) configuration file
    pub fn refresh(&self, interface: &str, config: &Path) -> Result<()> {
        info!(interface, config = %config.display(), "Reloading hub interface");
        self.down(interface, config)?;
        self.up(interface, config).map_err(|e| {
            error!(interface, "HUB INTERFACE IS DOWN, all peers are disconnected: {}", e);
            ProvisionError::InterfaceDown {
                interface: interface.to_string(),
                source: Box::new(e),
            }
        })
    }
}

fn wg_quick(action: &str, config: &Path) -> CommandSpec {
    CommandSpec::new("wg-quick")
        .arg(action)
        .arg(config.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, MockCommandRunner};
    use mockall::Sequence;

    #[test]
    fn test_refresh_runs_down_then_up() {
        let mut runner = MockCommandRunner::new();
        let mut seq = Sequence::new();
        runner
            .expect_run()
            .withf(|spec| spec.command_line() == "wg-quick down /etc/wireguard/wg0.conf")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::ok("")));
        runner
            .expect_run()
            .withf(|spec| spec.command_line() == "wg-quick up /etc/wireguard/wg0.conf")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::ok("")));

        let manager = InterfaceManager::new(&runner);
        manager
            .refresh("wg0", Path::new("/etc/wireguard/wg0.conf"))
            .unwrap();
    }

    #[test]
    fn test_down_failure_is_tolerated() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.args[0] == "down")
            .returning(|_| Ok(CommandOutput::failed(1, "wg-quick: `wg0' is not a WireGuard interface")));
        runner
            .expect_run()
            .withf(|spec| spec.args[0] == "up")
            .returning(|_| Ok(CommandOutput::ok("")));

        let manager = InterfaceManager::new(&runner);
        assert!(manager.refresh("wg0", Path::new("wg0.conf")).is_ok());
    }

    #[test]
    fn test_up_failure_flags_degraded_hub() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.args[0] == "down")
            .returning(|_| Ok(CommandOutput::ok("")));
        runner
            .expect_run()
            .withf(|spec| spec.args[0] == "up")
            .returning(|_| Ok(CommandOutput::failed(1, "RTNETLINK answers: File exists")));

        let manager = InterfaceManager::new(&runner);
        let err = manager.refresh("wg0", Path::new("wg0.conf")).unwrap_err();
        assert!(matches!(err, ProvisionError::InterfaceDown { .. }));
        assert!(err.to_string().contains("RTNETLINK"));
    }
}
