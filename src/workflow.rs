//! Provisioning workflow
//!
//! A [`ProvisionRequest`] is built once from the command line and handed to a
//! [`Provisioner`], which runs one of three linear, fail-fast pipelines:
//!
//! - create: key generation, config synthesis, server config mutation,
//!   interface refresh, then (unless hub-only) deployment, verification and
//!   watchdog installation on the client
//! - retry: only the client-side steps, against an existing client config
//! - remove: cut the peer stanza out of the server config and refresh
//!
//! Nothing is rolled back: a failure after a file was written leaves that
//! file in place and is reported.

use crate::config::{validate_client_address, validate_fqdn, HubContext};
use crate::error::{ProvisionError, Result};
use crate::exec::CommandRunner;
use crate::remote::{ConnectivityVerifier, Deployer, Deployment, RemoteShell, WatchdogInstaller};
use crate::runtime::{Interrupt, Workspace};
use crate::security::{ensure_directory, write_new, SecureFileMode};
use crate::wireguard::{
    synthesize, Client, ClientConfig, InterfaceManager, KeyGenerator, PeerSelector, PublicKey,
    ServerConfigFile,
};
use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zeroize::Zeroizing;

/// What an invocation does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Full provisioning including client deployment
    Create,
    /// Hub-side provisioning only (`-n`)
    HubOnly,
    /// Client-side steps only (`-I`)
    Retry,
    /// Peer removal (`-r`)
    Remove,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::HubOnly => write!(f, "create (hub only)"),
            Self::Retry => write!(f, "retry deployment"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// Validated request for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionRequest {
    /// Provision a new client
    Create {
        /// Client identity
        client: Client,
        /// Continue with the client-side steps
        deploy: bool,
    },
    /// Re-run the client-side steps for an already provisioned client
    Retry {
        /// Client identity
        client: Client,
    },
    /// Remove a peer from the hub
    Remove {
        /// Which stanza to remove
        selector: PeerSelector,
    },
}

impl ProvisionRequest {
    /// Mode of this request
    pub fn mode(&self) -> Mode {
        match self {
            Self::Create { deploy: true, .. } => Mode::Create,
            Self::Create { deploy: false, .. } => Mode::HubOnly,
            Self::Retry { .. } => Mode::Retry,
            Self::Remove { .. } => Mode::Remove,
        }
    }
}

/// Raw request flags as given on the command line
#[derive(Debug, Clone, Default)]
pub struct RequestFlags {
    /// `-f`
    pub fqdn: Option<String>,
    /// `-i`
    pub address: Option<Ipv4Addr>,
    /// `-k`
    pub public_key: Option<String>,
    /// `-I`
    pub install_only: bool,
    /// `-n`
    pub no_install: bool,
    /// `-r`
    pub remove: bool,
}

impl RequestFlags {
    /// Turn the flags into a request, rejecting undocumented combinations
    pub fn into_request(self) -> Result<ProvisionRequest> {
        if self.install_only && self.no_install {
            return Err(usage("-I and -n cannot be combined"));
        }

        if self.remove {
            if self.install_only || self.no_install {
                return Err(usage("-r cannot be combined with -I or -n"));
            }
            if self.address.is_some() {
                return Err(usage("-i is not used with -r"));
            }
            let selector = match (self.fqdn, self.public_key) {
                (Some(_), Some(_)) => return Err(usage("use either -f or -k with -r, not both")),
                (Some(fqdn), None) => PeerSelector::Fqdn(fqdn),
                (None, Some(key)) => PeerSelector::PublicKey(
                    PublicKey::from_base64(key.trim())
                        .map_err(|e| usage(&format!("invalid public key for -k: {}", e)))?,
                ),
                (None, None) => return Err(usage("-r requires -f or -k")),
            };
            return Ok(ProvisionRequest::Remove { selector });
        }

        if self.public_key.is_some() {
            return Err(usage("-k is only used with -r"));
        }
        let fqdn = self.fqdn.ok_or_else(|| usage("-f is required"))?;
        let address = self.address.ok_or_else(|| usage("-i is required"))?;
        let client = Client::new(fqdn, address);

        if self.install_only {
            Ok(ProvisionRequest::Retry { client })
        } else {
            Ok(ProvisionRequest::Create {
                client,
                deploy: !self.no_install,
            })
        }
    }
}

fn usage(message: &str) -> ProvisionError {
    ProvisionError::CommandLine(message.to_string())
}

/// Lifecycle state of a client
///
/// There is no state record: hub-side states are inferred from the files,
/// client-side states are only observed during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientState {
    /// No client configuration and no hub stanza
    Absent,
    /// Client configuration written and stanza present on the hub
    HubConfigured,
    /// Tunnel software and configuration in place on the client
    ClientDeployed,
    /// Client reached the hub over the tunnel
    Verified,
    /// Watchdog unit running on the client
    WatchdogInstalled,
}

impl ClientState {
    /// Infer the hub-side state of a client from the configuration files
    pub fn infer(hub: &HubContext, server: &ServerConfigFile, fqdn: &str) -> Self {
        let has_config = hub.client_config_path(fqdn).exists();
        let has_stanza = !server.find(&PeerSelector::Fqdn(fqdn.to_string())).is_empty();
        if has_config && has_stanza {
            Self::HubConfigured
        } else {
            Self::Absent
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Absent => "absent",
            Self::HubConfigured => "hub-configured",
            Self::ClientDeployed => "client-deployed",
            Self::Verified => "verified",
            Self::WatchdogInstalled => "watchdog-installed",
        };
        f.write_str(name)
    }
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// State reached by the client
    pub state: ClientState,
    /// Client configuration file involved
    pub client_config: Option<PathBuf>,
    /// Result of the deployment attempt, when one was made
    pub deployment: Option<Deployment>,
}

/// Runs provisioning requests against one hub
pub struct Provisioner<'a> {
    hub: &'a HubContext,
    runner: &'a dyn CommandRunner,
    workspace: &'a Workspace,
    interrupt: &'a Interrupt,
}

impl<'a> Provisioner<'a> {
    /// Create a provisioner
    pub fn new(
        hub: &'a HubContext,
        runner: &'a dyn CommandRunner,
        workspace: &'a Workspace,
        interrupt: &'a Interrupt,
    ) -> Self {
        Self {
            hub,
            runner,
            workspace,
            interrupt,
        }
    }

    /// Run a request to completion
    pub fn run(&self, request: &ProvisionRequest) -> Result<Outcome> {
        info!(mode = %request.mode(), "Starting");
        match request {
            ProvisionRequest::Create { client, deploy } => self.create(client, *deploy),
            ProvisionRequest::Retry { client } => self.retry(client),
            ProvisionRequest::Remove { selector } => self.remove(selector),
        }
    }

    /// Provision a new client on the hub and, when `deploy` is set, on the client
    pub fn create(&self, client: &Client, deploy: bool) -> Result<Outcome> {
        self.validate(client)?;

        let path = self.hub.client_config_path(&client.fqdn);
        if path.exists() {
            return Err(ProvisionError::AlreadyExists(format!(
                "{} is already provisioned ({} exists); remove it first",
                client.fqdn,
                path.display()
            )));
        }

        let mut server = ServerConfigFile::load(&self.hub.server_config)?;
        info!(
            fqdn = %client.fqdn,
            state = %ClientState::infer(self.hub, &server, &client.fqdn),
            "Current client state"
        );

        self.interrupt.check()?;
        let keys = KeyGenerator::new(self.runner).generate()?;
        let (client_config, stanza) = synthesize(client, &keys, self.hub);
        server.check_unique(&client.fqdn, client.address, &keys.public)?;

        self.interrupt.check()?;
        ensure_directory(&self.hub.client_config_dir)?;
        write_new(
            &path,
            client_config.render().as_bytes(),
            SecureFileMode::PrivateKey,
        )?;
        info!(path = %path.display(), "Client configuration written");

        server.append(&stanza)?;
        server.save()?;
        self.refresh()?;
        info!(fqdn = %client.fqdn, address = %client.address, "Client configured on hub");
        self.sync_standby();

        if !deploy {
            info!(
                fqdn = %client.fqdn,
                "Skipping client deployment; run again with -I to deploy"
            );
            return Ok(Outcome {
                state: ClientState::HubConfigured,
                client_config: Some(path),
                deployment: None,
            });
        }

        self.deploy_client(&client.fqdn, path)
    }

    /// Re-run the client-side steps for a client already configured on the hub
    pub fn retry(&self, client: &Client) -> Result<Outcome> {
        self.validate(client)?;

        let path = self.hub.client_config_path(&client.fqdn);
        let text = match fs::read_to_string(&path) {
            Ok(text) => Zeroizing::new(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProvisionError::NotFound(format!(
                    "No client configuration at {}; provision {} first",
                    path.display(),
                    client.fqdn
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let address = ClientConfig::parse_address(&text)?;
        if address != client.address {
            return Err(ProvisionError::Validation(format!(
                "{} was provisioned with address {}, not {}",
                client.fqdn, address, client.address
            )));
        }

        let public_key = ClientConfig::parse_private_key(&text)?.public_key();
        let server = ServerConfigFile::load(&self.hub.server_config)?;
        if server
            .find(&PeerSelector::PublicKey(public_key.clone()))
            .is_empty()
        {
            return Err(ProvisionError::Validation(format!(
                "Public key {} of {} is not configured in {}",
                public_key,
                client.fqdn,
                self.hub.server_config.display()
            )));
        }

        info!(fqdn = %client.fqdn, state = %ClientState::HubConfigured, "Retrying client deployment");
        self.deploy_client(&client.fqdn, path)
    }

    /// Remove a peer stanza from the hub
    pub fn remove(&self, selector: &PeerSelector) -> Result<Outcome> {
        if let PeerSelector::Fqdn(fqdn) = selector {
            validate_fqdn(fqdn)?;
        }

        let mut server = ServerConfigFile::load(&self.hub.server_config)?;
        let entry = server.remove(selector)?;

        self.interrupt.check()?;
        server.save()?;
        self.refresh()?;
        info!(peer = %selector, "Peer removed from hub");
        self.sync_standby();

        let name = match selector {
            PeerSelector::Fqdn(fqdn) => Some(fqdn.clone()),
            PeerSelector::PublicKey(_) => entry.name,
        };
        let client_config = name.map(|fqdn| self.hub.client_config_path(&fqdn));
        match &client_config {
            Some(path) if path.exists() => info!(
                path = %path.display(),
                "Client configuration is kept; delete it to allow provisioning this client again"
            ),
            Some(_) => {}
            None => info!("Removed stanza had no name comment; check the client configuration directory"),
        }

        Ok(Outcome {
            state: ClientState::Absent,
            client_config,
            deployment: None,
        })
    }

    fn validate(&self, client: &Client) -> Result<()> {
        validate_fqdn(&client.fqdn)?;
        validate_client_address(&self.hub.subnet, self.hub.hub_address, client.address)
    }

    fn refresh(&self) -> Result<()> {
        InterfaceManager::new(self.runner).refresh(&self.hub.interface, &self.hub.server_config)
    }

    fn deploy_client(&self, fqdn: &str, client_config: PathBuf) -> Result<Outcome> {
        let shell = RemoteShell::new(self.runner, &self.hub.ssh, fqdn);

        let deployment =
            Deployer::new(&shell, self.hub, self.workspace, self.interrupt).deploy(&client_config)?;
        if deployment == Deployment::Unreachable {
            return Ok(Outcome {
                state: ClientState::HubConfigured,
                client_config: Some(client_config),
                deployment: Some(deployment),
            });
        }

        self.interrupt.check()?;
        ConnectivityVerifier::new(&shell, self.hub).verify()?;

        self.interrupt.check()?;
        WatchdogInstaller::new(&shell, self.hub, self.interrupt).install()?;

        info!(fqdn, state = %ClientState::WatchdogInstalled, "Client provisioned");
        Ok(Outcome {
            state: ClientState::WatchdogInstalled,
            client_config: Some(client_config),
            deployment: Some(deployment),
        })
    }

    /// Push the firewall configuration to the standby hub, if one is configured
    fn sync_standby(&self) {
        let Some(standby) = &self.hub.standby else {
            return;
        };
        let shell = RemoteShell::new(self.runner, &self.hub.ssh, standby.host.as_str());
        let remote_path = standby.firewall_config.to_string_lossy();
        match upload_existing(&shell, &standby.firewall_config, &remote_path) {
            Ok(()) => info!(host = %standby.host, "Firewall configuration synced to standby"),
            Err(e) => warn!(host = %standby.host, "Standby firewall sync failed: {}", e),
        }
    }
}

fn upload_existing(shell: &RemoteShell<'_>, local: &Path, remote_path: &str) -> Result<()> {
    if !local.is_file() {
        return Err(ProvisionError::Config(format!(
            "{} does not exist",
            local.display()
        )));
    }
    shell.upload(local, remote_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(fqdn: Option<&str>, address: Option<&str>) -> RequestFlags {
        RequestFlags {
            fqdn: fqdn.map(str::to_string),
            address: address.map(|a| a.parse().unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_request() {
        let request = flags(Some("a.example.com"), Some("172.17.0.5"))
            .into_request()
            .unwrap();
        assert_eq!(request.mode(), Mode::Create);

        let request = RequestFlags {
            no_install: true,
            ..flags(Some("a.example.com"), Some("172.17.0.5"))
        }
        .into_request()
        .unwrap();
        assert_eq!(request.mode(), Mode::HubOnly);
    }

    #[test]
    fn test_retry_request() {
        let request = RequestFlags {
            install_only: true,
            ..flags(Some("a.example.com"), Some("172.17.0.5"))
        }
        .into_request()
        .unwrap();
        assert_eq!(request.mode(), Mode::Retry);
    }

    #[test]
    fn test_remove_request() {
        let request = RequestFlags {
            remove: true,
            ..flags(Some("a.example.com"), None)
        }
        .into_request()
        .unwrap();
        assert_eq!(
            request,
            ProvisionRequest::Remove {
                selector: PeerSelector::Fqdn("a.example.com".to_string())
            }
        );

        let key = crate::wireguard::KeyPair::generate().public;
        let request = RequestFlags {
            remove: true,
            public_key: Some(key.to_base64()),
            ..Default::default()
        }
        .into_request()
        .unwrap();
        assert_eq!(
            request,
            ProvisionRequest::Remove {
                selector: PeerSelector::PublicKey(key)
            }
        );
    }

    #[test]
    fn test_invalid_combinations() {
        let cases = vec![
            flags(Some("a.example.com"), None),
            flags(None, Some("172.17.0.5")),
            RequestFlags {
                install_only: true,
                no_install: true,
                ..flags(Some("a.example.com"), Some("172.17.0.5"))
            },
            RequestFlags {
                install_only: true,
                remove: true,
                ..flags(Some("a.example.com"), None)
            },
            RequestFlags {
                no_install: true,
                remove: true,
                ..flags(Some("a.example.com"), None)
            },
            RequestFlags {
                remove: true,
                ..flags(Some("a.example.com"), Some("172.17.0.5"))
            },
            RequestFlags {
                remove: true,
                ..Default::default()
            },
            RequestFlags {
                remove: true,
                public_key: Some("not-a-key".to_string()),
                ..Default::default()
            },
            RequestFlags {
                public_key: Some(crate::wireguard::KeyPair::generate().public.to_base64()),
                ..flags(Some("a.example.com"), Some("172.17.0.5"))
            },
        ];

        for case in cases {
            let debug = format!("{:?}", case);
            match case.into_request() {
                Err(ProvisionError::CommandLine(_)) => {}
                other => panic!("{} gave {:?}", debug, other),
            }
        }
    }

    #[test]
    fn test_state_order() {
        assert!(ClientState::Absent < ClientState::HubConfigured);
        assert!(ClientState::Verified < ClientState::WatchdogInstalled);
        assert_eq!(ClientState::HubConfigured.to_string(), "hub-configured");
    }
}
