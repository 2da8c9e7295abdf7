//! Privilege detection
//!
//! Hub-side tooling (`wg-quick`, writing under /etc/wireguard) normally needs
//! root; the workflow only notes it when it runs unprivileged.

use tracing::{debug, info};

/// Effective user id of the process, where the platform has one
pub fn effective_uid() -> Option<u32> {
    #[cfg(unix)]
    {
        Some(unsafe { libc::geteuid() })
    }

    #[cfg(not(unix))]
    {
        None
    }
}

/// Note when the process lacks the privileges hub-side steps usually need.
/// Returns whether it runs as root.
pub fn check_privileges() -> bool {
    match effective_uid() {
        Some(0) => {
            debug!("Running as root");
            true
        }
        Some(uid) => {
            info!(
                uid,
                "Running unprivileged; wg-quick and writes under /etc/wireguard usually require root"
            );
            false
        }
        None => {
            info!("Cannot determine the effective user; hub-side steps usually require root");
            false
        }
    }
}
