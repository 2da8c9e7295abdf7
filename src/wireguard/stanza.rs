//! WireGuard configuration stanzas
//!
//! Renders the client-side tunnel configuration and the hub-side peer
//! stanza in the wg-quick INI format. Rendering is pure: identical inputs
//! give byte-identical output.

use crate::config::HubContext;
use crate::error::{ProvisionError, Result};
use crate::wireguard::{KeyPair, PrivateKey, PublicKey};
use ipnet::Ipv4Net;
use std::fmt::Write as _;
use std::net::Ipv4Addr;
use zeroize::Zeroizing;

/// Identity of a client: FQDN and requested tunnel address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Fully-qualified domain name, also the SSH target
    pub fqdn: String,
    /// Tunnel IPv4 address
    pub address: Ipv4Addr,
}

impl Client {
    /// Create a client identity
    pub fn new(fqdn: impl Into<String>, address: Ipv4Addr) -> Self {
        Self {
            fqdn: fqdn.into(),
            address,
        }
    }
}

/// Client-side tunnel definition
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Local tunnel address
    pub address: Ipv4Addr,
    /// Client private key
    pub private_key: PrivateKey,
    /// Hub public key
    pub hub_public_key: PublicKey,
    /// Routed through the tunnel (the hub subnet)
    pub allowed_ips: Ipv4Net,
    /// Hub endpoint (host:port)
    pub endpoint: String,
    /// Persistent keepalive in seconds
    pub keepalive: u16,
}

impl ClientConfig {
    /// Render the configuration file content
    pub fn render(&self) -> Zeroizing<String> {
        let mut out = Zeroizing::new(String::new());
        // Writing to a String cannot fail
        let _ = write!(
            out,
            "[Interface]\n\
             Address = {}\n\
             PrivateKey = {}\n\
             \n\
             [Peer]\n\
             AllowedIPs = {}\n\
             Endpoint = {}\n\
             PersistentKeepalive = {}\n\
             PublicKey = {}\n",
            self.address,
            self.private_key.to_base64().as_str(),
            self.allowed_ips,
            self.endpoint,
            self.keepalive,
            self.hub_public_key,
        );
        out
    }

    /// Read the `Address` of the `[Interface]` section of a client configuration
    pub fn parse_address(text: &str) -> Result<Ipv4Addr> {
        let value = interface_value(text, "address").ok_or_else(|| {
            ProvisionError::Validation("Client configuration has no [Interface] Address".to_string())
        })?;
        let host = value.split('/').next().unwrap_or(value);
        host.trim().parse().map_err(|_| {
            ProvisionError::Validation(format!(
                "Invalid Address in client configuration: {}",
                value
            ))
        })
    }

    /// Read the `PrivateKey` of the `[Interface]` section of a client configuration
    pub fn parse_private_key(text: &str) -> Result<PrivateKey> {
        let value = interface_value(text, "privatekey").ok_or_else(|| {
            ProvisionError::Validation(
                "Client configuration has no [Interface] PrivateKey".to_string(),
            )
        })?;
        PrivateKey::from_base64(value)
    }
}

fn interface_value<'t>(text: &'t str, wanted: &str) -> Option<&'t str> {
    let mut in_interface = false;
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_interface = line.eq_ignore_ascii_case("[interface]");
            continue;
        }
        if !in_interface {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim().eq_ignore_ascii_case(wanted) {
                return Some(value.trim());
            }
        }
    }
    None
}

/// Hub-side peer stanza for one client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPeerStanza {
    /// Client FQDN, written as the lookup comment
    pub fqdn: String,
    /// Client public key
    pub public_key: PublicKey,
    /// Client tunnel address
    pub address: Ipv4Addr,
}

impl ServerPeerStanza {
    /// Render the stanza: comment line, `[Peer]` header and keys
    pub fn render(&self) -> String {
        format!(
            "# {}\n[Peer]\nAllowedIPs = {}/32\nPublicKey = {}\n",
            self.fqdn, self.address, self.public_key
        )
    }
}

/// Build both configuration artifacts for a client
pub fn synthesize(
    client: &Client,
    keys: &KeyPair,
    hub: &HubContext,
) -> (ClientConfig, ServerPeerStanza) {
    let client_config = ClientConfig {
        address: client.address,
        private_key: keys.private.clone(),
        hub_public_key: hub.hub_public_key.clone(),
        allowed_ips: hub.subnet,
        endpoint: hub.endpoint.clone(),
        keepalive: hub.keepalive,
    };

    let stanza = ServerPeerStanza {
        fqdn: client.fqdn.clone(),
        public_key: keys.public.clone(),
        address: client.address,
    };

    (client_config, stanza)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HubConfig, HubContext};

    const HUB_KEY: &str = "HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=";

    fn hub() -> HubContext {
        let toml = format!(
            r#"
subnet = "172.17.0.0/16"
endpoint = "vpn.example.com:51820"
hub_public_key = "{}"
hub_address = "172.17.0.1"
server_config = "/etc/wireguard/wg0.conf"
"#,
            HUB_KEY
        );
        HubContext::from_config(HubConfig::parse(&toml).unwrap()).unwrap()
    }

    #[test]
    fn test_client_config_format() {
        let keys = KeyPair::generate();
        let client = Client::new("a.example.com", "172.17.0.5".parse().unwrap());
        let (config, _) = synthesize(&client, &keys, &hub());

        let expected = format!(
            "[Interface]\nAddress = 172.17.0.5\nPrivateKey = {}\n\n[Peer]\nAllowedIPs = 172.17.0.0/16\nEndpoint = vpn.example.com:51820\nPersistentKeepalive = 25\nPublicKey = {}\n",
            keys.private.to_base64().as_str(),
            HUB_KEY
        );
        assert_eq!(config.render().as_str(), expected);
    }

    #[test]
    fn test_server_stanza_format() {
        let keys = KeyPair::generate();
        let client = Client::new("a.example.com", "172.17.0.5".parse().unwrap());
        let (_, stanza) = synthesize(&client, &keys, &hub());

        assert_eq!(
            stanza.render(),
            format!(
                "# a.example.com\n[Peer]\nAllowedIPs = 172.17.0.5/32\nPublicKey = {}\n",
                keys.public
            )
        );
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let keys = KeyPair::generate();
        let client = Client::new("b.example.com", "172.17.3.9".parse().unwrap());
        let (c1, s1) = synthesize(&client, &keys, &hub());
        let (c2, s2) = synthesize(&client, &keys, &hub());
        assert_eq!(c1.render(), c2.render());
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_parse_address() {
        let keys = KeyPair::generate();
        let client = Client::new("a.example.com", "172.17.0.5".parse().unwrap());
        let (config, _) = synthesize(&client, &keys, &hub());
        let address = ClientConfig::parse_address(&config.render()).unwrap();
        assert_eq!(address, client.address);

        assert!(ClientConfig::parse_address("[Peer]\nAddress = 1.2.3.4\n").is_err());
        let private = ClientConfig::parse_private_key(&config.render()).unwrap();
        assert_eq!(private.public_key(), keys.public);
        assert_eq!(
            ClientConfig::parse_address("[Interface]\nAddress = 10.0.0.2/24\n").unwrap(),
            Ipv4Addr::new(10, 0, 0, 2)
        );
    }
}
