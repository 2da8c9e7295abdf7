//! wg-provision: WireGuard peer provisioning for a hub server
//!
//! This library mints keys for a new client, writes the client configuration
//! and the hub-side peer stanza, reloads the hub interface and, when the
//! client answers over ssh, installs and starts the tunnel there, checks that
//! it reaches the hub and installs a watchdog unit. Peers are removed through
//! the same server configuration handling.
//!
//! # Architecture
//!
//! Every external program (key tool, `wg-quick`, ssh, scp) runs through the
//! [`exec::CommandRunner`] seam, so the whole pipeline can be driven against
//! a scripted runner in tests.
//!
//! # Modules
//!
//! - `config`: Hub configuration file parsing and validation
//! - `exec`: Typed local command execution
//! - `wireguard`: Keys, stanzas, server configuration and interface refresh
//! - `remote`: Client deployment, verification and watchdog over ssh
//! - `workflow`: Create, retry and remove pipelines
//! - `runtime`: Lock file, scratch directory, cancellation and exit tally
//! - `logging`: Subscriber setup with file, terminal and syslog sinks
//! - `security`: Privilege detection and owner-only file writes
//! - `error`: Error types and exit codes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod exec;
pub mod logging;
pub mod remote;
pub mod runtime;
pub mod security;
pub mod wireguard;
pub mod workflow;

// Re-export commonly used types
pub use error::{ProvisionError, Result};
pub use workflow::{Outcome, ProvisionRequest, Provisioner, RequestFlags};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
