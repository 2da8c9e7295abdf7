//! WireGuard keys, configuration stanzas and hub interface handling
//!
//! This module mints client key pairs with the `wg` tool, renders client and
//! hub configuration, mutates the hub's live configuration file and reloads
//! the hub interface with `wg-quick`.

mod interface;
mod keys;
mod server_config;
mod stanza;

pub use interface::InterfaceManager;
pub use keys::{KeyGenerator, KeyPair, PrivateKey, PublicKey};
pub use server_config::{PeerEntry, PeerSelector, ServerConfigFile};
pub use stanza::{synthesize, Client, ClientConfig, ServerPeerStanza};
