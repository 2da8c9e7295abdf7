//! Configuration management
//!
//! This module handles parsing and validation of the hub configuration file.
//! The file is declarative TOML: every required key is checked for presence
//! and type before any other logic runs, and unknown keys are rejected.

mod validation;

pub use validation::{
    validate_client_address, validate_endpoint, validate_fqdn, validate_interface_name,
    validate_keepalive,
};

use crate::error::{ProvisionError, Result};
use crate::wireguard::PublicKey;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the hub configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/wg-provision/wg-provision.toml";

/// Hub configuration file as written by the operator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubConfig {
    /// Hub tunnel subnet (CIDR, e.g. "172.17.0.0/16")
    pub subnet: String,

    /// Public endpoint clients connect to (host:port)
    pub endpoint: String,

    /// Base64-encoded hub public key
    pub hub_public_key: String,

    /// Hub's own tunnel address inside `subnet`
    pub hub_address: String,

    /// Live WireGuard configuration of the hub (e.g. /etc/wireguard/wg0.conf)
    pub server_config: PathBuf,

    /// Directory holding generated client configuration files
    #[serde(default)]
    pub client_config_dir: Option<PathBuf>,

    /// Interface name used on clients (defaults to the hub interface name)
    #[serde(default)]
    pub client_interface: Option<String>,

    /// Persistent keepalive written into client configuration
    #[serde(default = "default_keepalive")]
    pub keepalive: u16,

    /// Bootstrap installer copied to and executed on clients
    #[serde(default = "default_installer")]
    pub installer: PathBuf,

    /// Watchdog unit archive unpacked on clients
    #[serde(default = "default_watchdog_archive")]
    pub watchdog_archive: PathBuf,

    /// Name of the watchdog systemd unit inside the archive
    #[serde(default = "default_watchdog_unit")]
    pub watchdog_unit: String,

    /// PID lock file guarding against concurrent runs
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    /// Number of probes sent by the connectivity check
    #[serde(default = "default_ping_count")]
    pub ping_count: u32,

    /// Remote shell settings
    #[serde(default)]
    pub ssh: SshConfig,

    /// Optional standby host receiving the firewall configuration
    #[serde(default)]
    pub standby: Option<StandbyConfig>,
}

/// Remote shell settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    /// Login user on client hosts
    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Connection establishment timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Identity file passed with `-i`
    #[serde(default)]
    pub identity: Option<PathBuf>,

    /// Known hosts file passed as `UserKnownHostsFile`
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
}

impl SshConfig {
    /// Connection timeout as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout(),
            identity: None,
            known_hosts: None,
        }
    }
}

/// Standby host receiving a copy of the firewall configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StandbyConfig {
    /// Standby host name
    pub host: String,

    /// Firewall configuration file pushed after each hub change
    pub firewall_config: PathBuf,
}

impl HubConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            ProvisionError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            ProvisionError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Parse configuration from a TOML string
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml)
            .map_err(|e| ProvisionError::Config(format!("Failed to parse TOML: {}", e)))
    }
}

/// Immutable per-invocation hub metadata, validated from [`HubConfig`]
#[derive(Debug, Clone)]
pub struct HubContext {
    /// Hub tunnel subnet
    pub subnet: Ipv4Net,
    /// Public endpoint (host:port)
    pub endpoint: String,
    /// Hub public key
    pub hub_public_key: PublicKey,
    /// Hub's own tunnel address
    pub hub_address: Ipv4Addr,
    /// Live server configuration file
    pub server_config: PathBuf,
    /// Hub interface name, derived from the server configuration file name
    pub interface: String,
    /// Directory of client configuration files
    pub client_config_dir: PathBuf,
    /// Interface name on clients
    pub client_interface: String,
    /// Persistent keepalive for clients
    pub keepalive: u16,
    /// Bootstrap installer script
    pub installer: PathBuf,
    /// Watchdog archive
    pub watchdog_archive: PathBuf,
    /// Watchdog unit name
    pub watchdog_unit: String,
    /// PID lock file
    pub lock_file: PathBuf,
    /// Connectivity probe count
    pub ping_count: u32,
    /// Remote shell settings
    pub ssh: SshConfig,
    /// Standby firewall sync
    pub standby: Option<StandbyConfig>,
}

impl HubContext {
    /// Validate a parsed configuration into a hub context
    pub fn from_config(config: HubConfig) -> Result<Self> {
        let subnet: Ipv4Net = config.subnet.trim().parse().map_err(|e| {
            ProvisionError::Config(format!("Invalid subnet '{}': {}", config.subnet, e))
        })?;
        let subnet = subnet.trunc();

        let hub_address: Ipv4Addr = config.hub_address.trim().parse().map_err(|_| {
            ProvisionError::Config(format!("Invalid hub address: {}", config.hub_address))
        })?;
        if !subnet.contains(&hub_address) {
            return Err(ProvisionError::Config(format!(
                "Hub address {} is not inside subnet {}",
                hub_address, subnet
            )));
        }

        validate_endpoint(&config.endpoint)?;
        validate_keepalive(config.keepalive)?;

        let hub_public_key = PublicKey::from_base64(&config.hub_public_key)
            .map_err(|e| ProvisionError::Config(format!("hub_public_key: {}", e)))?;

        let interface = interface_from_path(&config.server_config)?;
        let client_interface = config
            .client_interface
            .unwrap_or_else(|| interface.clone());
        validate_interface_name(&client_interface)?;

        let client_config_dir = match config.client_config_dir {
            Some(dir) => dir,
            None => config
                .server_config
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("clients"),
        };

        if config.ping_count == 0 {
            return Err(ProvisionError::Config(
                "ping_count must be at least 1".to_string(),
            ));
        }
        if config.ssh.connect_timeout_secs == 0 {
            return Err(ProvisionError::Config(
                "ssh.connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        if config.watchdog_unit.trim().is_empty() {
            return Err(ProvisionError::Config(
                "watchdog_unit cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            subnet,
            endpoint: config.endpoint,
            hub_public_key,
            hub_address,
            server_config: config.server_config,
            interface,
            client_config_dir,
            client_interface,
            keepalive: config.keepalive,
            installer: config.installer,
            watchdog_archive: config.watchdog_archive,
            watchdog_unit: config.watchdog_unit,
            lock_file: config.lock_file,
            ping_count: config.ping_count,
            ssh: config.ssh,
            standby: config.standby,
        })
    }

    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_config(HubConfig::from_file(path)?)
    }

    /// Path of the client configuration file for a FQDN
    pub fn client_config_path(&self, fqdn: &str) -> PathBuf {
        self.client_config_dir.join(format!("{}.conf", fqdn))
    }

    /// Path of the tunnel configuration on the client host
    pub fn remote_config_path(&self) -> String {
        format!("/etc/wireguard/{}.conf", self.client_interface)
    }
}

/// Derive the interface name from a WireGuard configuration path (`wg0.conf` -> `wg0`)
pub fn interface_from_path(path: &Path) -> Result<String> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            ProvisionError::Config(format!(
                "Cannot derive interface name from {}",
                path.display()
            ))
        })?;
    validate_interface_name(stem)?;
    Ok(stem.to_string())
}

// Default value functions for serde
fn default_keepalive() -> u16 {
    25
}

fn default_installer() -> PathBuf {
    PathBuf::from("/usr/share/wg-provision/wg-install.sh")
}

fn default_watchdog_archive() -> PathBuf {
    PathBuf::from("/usr/share/wg-provision/wg-watchdog.tar.gz")
}

fn default_watchdog_unit() -> String {
    "wg-watchdog".to_string()
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/run/wg-provision.pid")
}

fn default_ping_count() -> u32 {
    3
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    5
}
