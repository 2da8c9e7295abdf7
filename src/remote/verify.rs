//! Connectivity verification from the client back to the hub

use crate::config::HubContext;
use crate::error::{ProvisionError, Result};
use crate::exec::CommandSpec;
use crate::remote::RemoteShell;
use tracing::info;

/// Per-probe reply timeout passed to ping, in seconds
const PROBE_TIMEOUT_SECS: u32 = 2;

/// Pings the hub's tunnel address from the client
pub struct ConnectivityVerifier<'a> {
    shell: &'a RemoteShell<'a>,
    hub: &'a HubContext,
}

impl<'a> ConnectivityVerifier<'a> {
    /// Create a verifier for the shell's host
    pub fn new(shell: &'a RemoteShell<'a>, hub: &'a HubContext) -> Self {
        Self { shell, hub }
    }

    /// Succeed only when every probe was answered
    pub fn verify(&self) -> Result<()> {
        let host = self.shell.host();
        let target = self.hub.hub_address.to_string();
        let probe = CommandSpec::new("ping").args([
            "-c".to_string(),
            self.hub.ping_count.to_string(),
            "-W".to_string(),
            PROBE_TIMEOUT_SECS.to_string(),
            target.clone(),
        ]);

        let output = self.shell.exec(&probe)?;
        if RemoteShell::connection_failed(&output) {
            return output
                .check(&probe)
                .map(|_| ())
                .map_err(|e| ProvisionError::remote(host, e));
        }

        match packet_loss(&output.stdout) {
            Some(loss) if loss == 0.0 && output.success() => {
                info!(host, target = %target, "Tunnel connectivity verified");
                Ok(())
            }
            Some(loss) => Err(ProvisionError::Connectivity {
                host: host.to_string(),
                target,
                detail: format!("{}% packet loss ({})", loss, output.status),
            }),
            None => Err(ProvisionError::Connectivity {
                host: host.to_string(),
                target,
                detail: format!(
                    "probe did not report packet loss ({}): {}",
                    output.status,
                    output.stderr.trim()
                ),
            }),
        }
    }
}

/// Extract the packet loss percentage from ping's summary line
pub fn packet_loss(stdout: &str) -> Option<f64> {
    stdout.lines().find_map(|line| {
        let idx = line.find("% packet loss")?;
        let number = line[..idx].rsplit(|c: char| c == ' ' || c == ',').next()?;
        number.trim().parse().ok()
    })
}
