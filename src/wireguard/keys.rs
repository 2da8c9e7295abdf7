//! WireGuard key management
//!
//! Client key pairs are minted with the platform's `wg` tool. The tool's
//! output is parsed back into typed keys and the public key is checked
//! against the x25519 derivation of the private key before it is used.

use crate::error::{ProvisionError, Result};
use crate::exec::{CommandRunner, CommandSpec, RunChecked};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;
use tracing::{debug, info};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

fn decode_key(s: &str, what: &str) -> Result<[u8; 32]> {
    let decoded = BASE64
        .decode(s.trim())
        .map_err(|e| ProvisionError::Validation(format!("Invalid base64 {}: {}", what, e)))?;

    if decoded.len() != 32 {
        return Err(ProvisionError::Validation(format!(
            "Invalid {} length: expected 32 bytes, got {}",
            what,
            decoded.len()
        )));
    }

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&decoded);
    Ok(bytes)
}

/// WireGuard private key (32 bytes, x25519)
#[derive(Clone)]
pub struct PrivateKey {
    secret: Zeroizing<[u8; 32]>,
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        Self {
            secret: Zeroizing::new(secret.to_bytes()),
        }
    }

    /// Parse a private key from base64-encoded string
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = Zeroizing::new(decode_key(s, "private key")?);
        Ok(Self { secret: bytes })
    }

    /// Convert to base64-encoded string
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(BASE64.encode(*self.secret))
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(*self.secret);
        let public = X25519PublicKey::from(&secret);
        PublicKey {
            key: public.to_bytes(),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

// Ensure private keys are never accidentally logged
impl fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// WireGuard public key (32 bytes, x25519)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    key: [u8; 32],
}

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { key: bytes }
    }

    /// Parse a public key from base64-encoded string
    pub fn from_base64(s: &str) -> Result<Self> {
        Ok(Self::from_bytes(decode_key(s, "public key")?))
    }

    /// Convert to base64-encoded string
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.key)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

/// WireGuard key pair (private + public)
#[derive(Clone)]
pub struct KeyPair {
    /// Private key
    pub private: PrivateKey,
    /// Public key (derived from private)
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair in-process
    pub fn generate() -> Self {
        Self::from_private(PrivateKey::generate())
    }

    /// Create a key pair from a private key
    pub fn from_private(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }

    /// Build a key pair from the base64 output of the key tool
    ///
    /// The reported public key must match the derivation of the private key.
    pub fn from_tool_output(private_b64: &str, public_b64: &str) -> Result<Self> {
        let private = PrivateKey::from_base64(private_b64)?;
        let public = PublicKey::from_base64(public_b64)?;

        if private.public_key() != public {
            return Err(ProvisionError::Validation(
                "Key tool returned a public key that does not match the private key".to_string(),
            ));
        }

        Ok(Self { private, public })
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private", &"[REDACTED]")
            .field("public", &self.public)
            .finish()
    }
}

/// Mints client key pairs with `wg genkey` / `wg pubkey`
///
/// Failures are not retried: a failing key tool points at a broken
/// environment.
pub struct KeyGenerator<'a> {
    runner: &'a dyn CommandRunner,
    tool: String,
}

impl<'a> KeyGenerator<'a> {
    /// Create a generator using the `wg` binary from PATH
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            tool: "wg".to_string(),
        }
    }

    /// Generate a fresh key pair
    pub fn generate(&self) -> Result<KeyPair> {
        debug!("Generating client key pair with {}", self.tool);

        let genkey = CommandSpec::new(&self.tool).arg("genkey").secret_output();
        let private = Zeroizing::new(self.runner.run_checked(&genkey)?.stdout);

        let pubkey = CommandSpec::new(&self.tool)
            .arg("pubkey")
            .secret_stdin(private.trim().as_bytes().to_vec());
        let public = self.runner.run_checked(&pubkey)?.stdout;

        let keypair = KeyPair::from_tool_output(&private, &public)?;
        info!(public_key = %keypair.public, "Generated client key pair");
        Ok(keypair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, MockCommandRunner};

    #[test]
    fn test_generate_keypair() {
        let keypair = KeyPair::generate();
        assert_eq!(keypair.private.public_key(), keypair.public);
    }

    #[test]
    fn test_private_key_base64_roundtrip() {
        let private = PrivateKey::generate();
        let encoded = private.to_base64();
        assert_eq!(encoded.len(), 44); // Base64 of 32 bytes
        let restored = PrivateKey::from_base64(&encoded).unwrap();
        assert_eq!(private.public_key(), restored.public_key());
    }

    #[test]
    fn test_private_key_not_logged() {
        let private = PrivateKey::generate();
        let debug_str = format!("{:?}", private);
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains(private.to_base64().as_str()));
        let pair_str = format!("{:?}", KeyPair::from_private(private));
        assert!(pair_str.contains("REDACTED"));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(PrivateKey::from_base64("invalid!@#$").is_err());
        assert!(PublicKey::from_base64(&BASE64.encode([0u8; 16])).is_err());
    }

    #[test]
    fn test_mismatched_tool_output_rejected() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let err = KeyPair::from_tool_output(&a.private.to_base64(), &b.public.to_base64());
        assert!(matches!(err, Err(ProvisionError::Validation(_))));
    }

    #[test]
    fn test_generator_uses_wg_tool() {
        let pair = KeyPair::generate();
        let private_b64 = pair.private.to_base64().to_string();
        let public_b64 = pair.public.to_base64();
        let expected_stdin = private_b64.clone();

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.program == "wg" && spec.args == ["genkey"])
            .times(1)
            .returning(move |_| Ok(CommandOutput::ok(format!("{}\n", private_b64))));
        runner
            .expect_run()
            .withf(move |spec| {
                spec.args == ["pubkey"] && spec.stdin.as_deref() == Some(expected_stdin.as_bytes())
            })
            .times(1)
            .returning(move |_| Ok(CommandOutput::ok(format!("{}\n", public_b64))));

        let generated = KeyGenerator::new(&runner).generate().unwrap();
        assert_eq!(generated.public, pair.public);
    }

    #[test]
    fn test_generator_failure_carries_stderr() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::failed(127, "wg: command not found")));

        let err = KeyGenerator::new(&runner).generate().unwrap_err();
        match err {
            ProvisionError::Command { command, output, .. } => {
                assert_eq!(command, "wg genkey");
                assert_eq!(output.stderr, "wg: command not found");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
