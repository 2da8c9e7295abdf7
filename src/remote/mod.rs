//! Client-side operations over a remote shell
//!
//! - `shell`: ssh/scp transport with typed commands
//! - `deploy`: bootstrap install, configuration copy, service start
//! - `verify`: ping from the client to the hub over the tunnel
//! - `watchdog`: watchdog unit installation

mod deploy;
mod shell;
mod verify;
mod watchdog;

pub use deploy::{Deployer, Deployment};
pub use shell::{remote_command_line, shell_quote, RemoteShell};
pub use verify::{packet_loss, ConnectivityVerifier};
pub use watchdog::WatchdogInstaller;
