//! Hub server configuration file
//!
//! The live wg-quick configuration of the hub is kept as text and mutated in
//! place: new peers are appended, removed peers are cut out by byte span, so
//! every other stanza keeps its exact bytes.

use crate::error::{ProvisionError, Result};
use crate::security::{write_atomic, SecureFileMode};
use crate::wireguard::{PublicKey, ServerPeerStanza};
use ipnet::Ipv4Net;
use std::fs;
use std::net::Ipv4Addr;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One `[Peer]` section found in the server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    /// Comment line directly above the header (the client FQDN)
    pub name: Option<String>,
    /// Raw `PublicKey` value
    pub public_key: Option<String>,
    /// Raw `AllowedIPs` entries
    pub allowed_ips: Vec<String>,
    /// Byte span from the separating blank line and annotation to the last
    /// line before the next section's annotation
    pub span: Range<usize>,
}

impl PeerEntry {
    /// Whether any AllowedIPs entry covers the address
    pub fn covers(&self, addr: Ipv4Addr) -> bool {
        self.allowed_ips.iter().any(|entry| match entry.parse::<Ipv4Net>() {
            Ok(net) => net.contains(&addr),
            Err(_) => entry.parse::<Ipv4Addr>().map(|a| a == addr).unwrap_or(false),
        })
    }
}

/// Lookup key for removing a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSelector {
    /// Match the FQDN comment annotation
    Fqdn(String),
    /// Match the PublicKey value
    PublicKey(PublicKey),
}

impl std::fmt::Display for PeerSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fqdn(fqdn) => write!(f, "name {}", fqdn),
            Self::PublicKey(key) => write!(f, "public key {}", key),
        }
    }
}

/// Hub configuration file content
#[derive(Debug, Clone)]
pub struct ServerConfigFile {
    path: PathBuf,
    text: String,
    peers: Vec<PeerEntry>,
    interface_addresses: Vec<String>,
}

impl ServerConfigFile {
    /// Load and parse the configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ProvisionError::Config(format!(
                "Failed to read server configuration {:?}: {}",
                path, e
            ))
        })?;
        Ok(Self::parse(path, text))
    }

    /// Parse configuration text that belongs to `path`
    pub fn parse(path: impl Into<PathBuf>, text: String) -> Self {
        let (peers, interface_addresses) = scan(&text);
        Self {
            path: path.into(),
            text,
            peers,
            interface_addresses,
        }
    }

    /// Path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parsed peer sections in file order
    pub fn peers(&self) -> &[PeerEntry] {
        &self.peers
    }

    /// Check that a new peer collides with nothing already configured
    pub fn check_unique(
        &self,
        fqdn: &str,
        address: Ipv4Addr,
        public_key: &PublicKey,
    ) -> Result<()> {
        if !self.find(&PeerSelector::Fqdn(fqdn.to_string())).is_empty() {
            return Err(ProvisionError::AlreadyExists(format!(
                "A peer named {} is already configured in {}; remove it first",
                fqdn,
                self.path.display()
            )));
        }

        for entry in &self.interface_addresses {
            let host = entry.split('/').next().unwrap_or(entry);
            if host.trim().parse::<Ipv4Addr>().ok() == Some(address) {
                return Err(ProvisionError::Validation(format!(
                    "Address {} is assigned to the hub interface",
                    address
                )));
            }
        }

        let key = public_key.to_base64();
        for peer in &self.peers {
            if peer.covers(address) {
                return Err(ProvisionError::Validation(format!(
                    "Address {} is already used by peer {}",
                    address,
                    peer.name.as_deref().unwrap_or("(unnamed)")
                )));
            }
            if peer.public_key.as_deref() == Some(key.as_str()) {
                return Err(ProvisionError::Validation(format!(
                    "Public key {} is already configured",
                    key
                )));
            }
        }

        Ok(())
    }

    /// Find peers matching the selector
    pub fn find(&self, selector: &PeerSelector) -> Vec<&PeerEntry> {
        self.peers
            .iter()
            .filter(|peer| match selector {
                PeerSelector::Fqdn(fqdn) => peer.name.as_deref() == Some(fqdn.as_str()),
                PeerSelector::PublicKey(key) => {
                    peer.public_key.as_deref() == Some(key.to_base64().as_str())
                }
            })
            .collect()
    }

    /// Append a peer stanza after validating uniqueness
    pub fn append(&mut self, stanza: &ServerPeerStanza) -> Result<()> {
        self.check_unique(&stanza.fqdn, stanza.address, &stanza.public_key)?;

        let mut text = std::mem::take(&mut self.text);
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push('\n');
        text.push_str(&stanza.render());

        debug!(fqdn = %stanza.fqdn, "Appended peer stanza");
        *self = Self::parse(std::mem::take(&mut self.path), text);
        Ok(())
    }

    /// Remove exactly one matching peer stanza and return it
    pub fn remove(&mut self, selector: &PeerSelector) -> Result<PeerEntry> {
        let matches = self.find(selector);
        let entry = match matches.as_slice() {
            [] => {
                return Err(ProvisionError::NotFound(format!(
                    "No peer with {} in {}",
                    selector,
                    self.path.display()
                )))
            }
            [single] => (*single).clone(),
            many => {
                return Err(ProvisionError::Ambiguous(format!(
                    "{} peers match {} in {}",
                    many.len(),
                    selector,
                    self.path.display()
                )))
            }
        };

        let mut text = std::mem::take(&mut self.text);
        text.replace_range(entry.span.clone(), "");
        *self = Self::parse(std::mem::take(&mut self.path), text);
        Ok(entry)
    }

    /// Write the current text back to the file atomically
    pub fn save(&self) -> Result<()> {
        write_atomic(&self.path, self.text.as_bytes(), SecureFileMode::PrivateKey)?;
        info!(path = %self.path.display(), peers = self.peers.len(), "Server configuration written");
        Ok(())
    }
}

struct Line<'a> {
    start: usize,
    end: usize,
    content: &'a str,
}

fn lines_with_offsets(text: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for raw in text.split_inclusive('\n') {
        let end = start + raw.len();
        lines.push(Line {
            start,
            end,
            content: raw.trim_end_matches(['\n', '\r']),
        });
        start = end;
    }
    lines
}

fn is_header(line: &str) -> bool {
    let line = line.trim();
    line.starts_with('[') && line.ends_with(']')
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// First line of the annotation above the header at `header`: the comment
/// lines directly above it plus one separating blank line, never reaching
/// below `floor`
fn annotation_start(lines: &[Line<'_>], header: usize, floor: usize) -> usize {
    let mut first = header;
    while first > floor && is_comment(lines[first - 1].content) {
        first -= 1;
    }
    if first > floor && is_blank(lines[first - 1].content) {
        first -= 1;
    }
    first
}

/// Scan configuration text for peer sections and interface addresses
fn scan(text: &str) -> (Vec<PeerEntry>, Vec<String>) {
    let lines = lines_with_offsets(text);
    let headers: Vec<usize> = (0..lines.len())
        .filter(|&n| is_header(lines[n].content))
        .collect();
    let mut peers = Vec::new();
    let mut interface_addresses = Vec::new();

    for (pos, &i) in headers.iter().enumerate() {
        let header = lines[i].content.trim();
        let floor = if pos > 0 { headers[pos - 1] + 1 } else { 0 };

        // A section may hold comments and blank lines; it ends where the
        // next section's annotation begins
        let end = match headers.get(pos + 1) {
            Some(&next) => annotation_start(&lines, next, i + 1),
            None => lines.len(),
        };
        let body = &lines[i + 1..end];

        if header.eq_ignore_ascii_case("[interface]") {
            for line in body {
                if let Some((key, value)) = key_value(line.content) {
                    if key.eq_ignore_ascii_case("address") {
                        interface_addresses
                            .extend(value.split(',').map(|v| v.trim().to_string()));
                    }
                }
            }
        } else if header.eq_ignore_ascii_case("[peer]") {
            let name = (i > floor && is_comment(lines[i - 1].content)).then(|| {
                lines[i - 1]
                    .content
                    .trim_start()
                    .trim_start_matches('#')
                    .trim()
                    .to_string()
            });

            let mut public_key = None;
            let mut allowed_ips = Vec::new();
            for line in body.iter().filter(|l| !is_comment(l.content)) {
                if let Some((key, value)) = key_value(line.content) {
                    if key.eq_ignore_ascii_case("publickey") {
                        public_key = Some(value.to_string());
                    } else if key.eq_ignore_ascii_case("allowedips") {
                        allowed_ips.extend(
                            value
                                .split(',')
                                .map(|v| v.trim().to_string())
                                .filter(|v| !v.is_empty()),
                        );
                    }
                }
            }

            peers.push(PeerEntry {
                name,
                public_key,
                allowed_ips,
                span: lines[annotation_start(&lines, i, floor)].start..lines[end - 1].end,
            });
        }
    }

    (peers, interface_addresses)
}
