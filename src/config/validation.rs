//! Configuration and request validation functions
//!
//! This module provides validation for interface names, endpoints, keepalive
//! intervals, client names and client tunnel addresses.

use crate::error::{ProvisionError, Result};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Validate interface name (alphanumeric, max 15 chars)
pub fn validate_interface_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ProvisionError::Config(
            "Interface name cannot be empty".to_string(),
        ));
    }

    if name.len() > 15 {
        return Err(ProvisionError::Config(format!(
            "Interface name '{}' exceeds maximum length of 15 characters",
            name
        )));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(ProvisionError::Config(format!(
            "Interface name '{}' contains invalid characters (only alphanumeric, '_', and '-' allowed)",
            name
        )));
    }

    Ok(())
}

/// Validate endpoint format (host:port)
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    let parts: Vec<&str> = endpoint.rsplitn(2, ':').collect();

    if parts.len() != 2 {
        return Err(ProvisionError::Config(format!(
            "Invalid endpoint format: {} (expected format: host:port)",
            endpoint
        )));
    }

    let port: u16 = parts[0].parse().map_err(|_| {
        ProvisionError::Config(format!("Invalid port in endpoint: {}", endpoint))
    })?;

    if port == 0 {
        return Err(ProvisionError::Config(
            "Port number cannot be 0".to_string(),
        ));
    }

    // Host can be a name or an address
    let host = parts[1];
    if host.is_empty() {
        return Err(ProvisionError::Config(
            "Host cannot be empty in endpoint".to_string(),
        ));
    }

    Ok(())
}

/// Validate keepalive interval
pub fn validate_keepalive(secs: u16) -> Result<()> {
    // 0 (disabled) or 10-300 seconds
    if secs > 0 && secs < 10 {
        return Err(ProvisionError::Config(format!(
            "Keepalive interval {} is too short (minimum 10 seconds or 0 to disable)",
            secs
        )));
    }

    if secs > 300 {
        return Err(ProvisionError::Config(format!(
            "Keepalive interval {} is too long (maximum 300 seconds)",
            secs
        )));
    }

    Ok(())
}

/// Validate a client's fully-qualified domain name
///
/// The name doubles as a file name and as the lookup comment in the server
/// configuration, so only DNS label characters are accepted.
pub fn validate_fqdn(fqdn: &str) -> Result<()> {
    if fqdn.is_empty() {
        return Err(ProvisionError::Validation(
            "Client name cannot be empty".to_string(),
        ));
    }

    if fqdn.len() > 253 {
        return Err(ProvisionError::Validation(format!(
            "Client name '{}' exceeds 253 characters",
            fqdn
        )));
    }

    for label in fqdn.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(ProvisionError::Validation(format!(
                "Invalid client name '{}': empty or oversized label",
                fqdn
            )));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(ProvisionError::Validation(format!(
                "Invalid client name '{}': label '{}' starts or ends with '-'",
                fqdn, label
            )));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ProvisionError::Validation(format!(
                "Invalid client name '{}': only letters, digits, '-' and '.' allowed",
                fqdn
            )));
        }
    }

    Ok(())
}

/// Validate a requested client address against the hub subnet
///
/// The address must lie inside the subnet, must not be the network or
/// broadcast address, and must differ from the hub's own address.
pub fn validate_client_address(subnet: &Ipv4Net, hub: Ipv4Addr, addr: Ipv4Addr) -> Result<()> {
    if !subnet.contains(&addr) {
        return Err(ProvisionError::Validation(format!(
            "Address {} is not inside subnet {}",
            addr, subnet
        )));
    }

    if addr == hub {
        return Err(ProvisionError::Validation(format!(
            "Address {} is the hub's own tunnel address",
            addr
        )));
    }

    if subnet.prefix_len() < 31 && (addr == subnet.network() || addr == subnet.broadcast()) {
        return Err(ProvisionError::Validation(format!(
            "Address {} is the network or broadcast address of {}",
            addr, subnet
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn subnet() -> Ipv4Net {
        "172.17.0.0/16".parse().unwrap()
    }

    const HUB: Ipv4Addr = Ipv4Addr::new(172, 17, 0, 1);

    #[test]
    fn test_validate_interface_name() {
        assert!(validate_interface_name("wg0").is_ok());
        assert!(validate_interface_name("wg-test").is_ok());
        assert!(validate_interface_name("wg_test").is_ok());
        assert!(validate_interface_name("").is_err());
        assert!(validate_interface_name("wg@test").is_err());
        assert!(validate_interface_name("toolonginterfacename").is_err());
    }

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("example.com:51820").is_ok());
        assert!(validate_endpoint("192.168.1.1:51820").is_ok());
        assert!(validate_endpoint("invalid").is_err());
        assert!(validate_endpoint("example.com:0").is_err());
        assert!(validate_endpoint(":51820").is_err());
    }

    #[test]
    fn test_validate_keepalive() {
        assert!(validate_keepalive(0).is_ok());
        assert!(validate_keepalive(25).is_ok());
        assert!(validate_keepalive(5).is_err());
        assert!(validate_keepalive(301).is_err());
    }

    #[test]
    fn test_validate_fqdn() {
        assert!(validate_fqdn("a.example.com").is_ok());
        assert!(validate_fqdn("host-01").is_ok());
        assert!(validate_fqdn("").is_err());
        assert!(validate_fqdn("a..example.com").is_err());
        assert!(validate_fqdn("-a.example.com").is_err());
        assert!(validate_fqdn("a/b.example.com").is_err());
        assert!(validate_fqdn("a b").is_err());
    }

    #[test]
    fn test_client_address_rules() {
        assert!(validate_client_address(&subnet(), HUB, "172.17.0.5".parse().unwrap()).is_ok());
        assert!(validate_client_address(&subnet(), HUB, HUB).is_err());
        assert!(validate_client_address(&subnet(), HUB, "172.18.0.5".parse().unwrap()).is_err());
        assert!(validate_client_address(&subnet(), HUB, "172.17.0.0".parse().unwrap()).is_err());
        assert!(validate_client_address(&subnet(), HUB, "172.17.255.255".parse().unwrap()).is_err());
    }

    proptest! {
        #[test]
        fn prop_host_addresses_inside_subnet_accepted(host in 2u32..65535) {
            let addr = Ipv4Addr::from(u32::from(Ipv4Addr::new(172, 17, 0, 0)) + host);
            prop_assert!(validate_client_address(&subnet(), HUB, addr).is_ok());
        }

        #[test]
        fn prop_addresses_outside_subnet_rejected(raw in any::<u32>()) {
            let addr = Ipv4Addr::from(raw);
            prop_assume!(!subnet().contains(&addr));
            prop_assert!(validate_client_address(&subnet(), HUB, addr).is_err());
        }
    }
}
