//! Common types for the PayCentral environment abstraction.

use crate::EnvError;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a cart mandate.
///
/// Uses UUID v4 in production: 122 random bits make the identifier an
/// unguessable token without coordination between issuers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MandateId(pub Uuid);

impl MandateId {
    /// Creates a new random MandateId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a MandateId from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates a MandateId from raw bytes (for seed-derived identifiers).
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Creates a deterministic MandateId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns the raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for MandateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MandateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MandateId {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| EnvError::InvalidMandateId(format!("{}: {}", s, e)))
    }
}

/// Secret key material for the mandate integrity tag.
///
/// Provisioned externally; rotation and storage are the operator's concern.
/// `Debug` never prints the key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    /// Environment variable the production CLI reads the hex secret from.
    pub const ENV_VAR: &'static str = "PAYCENTRAL_SIGNING_KEY";

    /// Minimum accepted key length in bytes (HMAC-SHA256 block-size guidance).
    pub const MIN_LEN: usize = 32;

    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, EnvError> {
        let bytes = bytes.into();
        if bytes.len() < Self::MIN_LEN {
            return Err(EnvError::invalid_secret(format!(
                "expected at least {} bytes, got {}",
                Self::MIN_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Decodes a hex-encoded secret.
    pub fn from_hex(encoded: &str) -> Result<Self, EnvError> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| EnvError::invalid_secret(format!("hex decode failed: {}", e)))?;
        Self::from_bytes(bytes)
    }

    /// Reads a hex-encoded secret from the named environment variable.
    pub fn from_env(var: &str) -> Result<Self, EnvError> {
        let encoded = std::env::var(var)
            .map_err(|_| EnvError::MissingVariable(var.to_string()))?;
        Self::from_hex(&encoded)
    }

    /// Generates a fresh random secret from OS entropy.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; Self::MIN_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningSecret(<{} bytes>)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mandate_id_from_seed_is_deterministic() {
        assert_eq!(MandateId::from_seed(7), MandateId::from_seed(7));
        assert_ne!(MandateId::from_seed(7), MandateId::from_seed(8));
    }

    #[test]
    fn test_mandate_id_roundtrips_through_display() {
        let id = MandateId::new();
        let parsed: MandateId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_mandate_id_rejects_garbage() {
        assert!("cart_123".parse::<MandateId>().is_err());
    }

    #[test]
    fn test_mandate_id_serializes_as_string() {
        let id = MandateId::from_seed(1);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn test_secret_rejects_short_keys() {
        assert!(SigningSecret::from_bytes(vec![1u8; 16]).is_err());
        assert!(SigningSecret::from_bytes(vec![1u8; 32]).is_ok());
    }

    #[test]
    fn test_secret_from_hex() {
        let encoded = "ab".repeat(32);
        let secret = SigningSecret::from_hex(&encoded).unwrap();
        assert_eq!(secret.as_bytes(), &[0xab; 32][..]);

        assert!(SigningSecret::from_hex("not-hex").is_err());
    }

    #[test]
    fn test_secret_from_missing_env_var() {
        let err = SigningSecret::from_env("PAYCENTRAL_TEST_DEFINITELY_UNSET").unwrap_err();
        assert!(matches!(err, EnvError::MissingVariable(_)));
    }

    #[test]
    fn test_generated_secrets_differ() {
        let a = SigningSecret::generate();
        let b = SigningSecret::generate();
        assert_eq!(a.as_bytes().len(), SigningSecret::MIN_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = SigningSecret::from_bytes(vec![0x42; 32]).unwrap();
        let printed = format!("{:?}", secret);
        assert!(!printed.contains("42"));
        assert!(printed.contains("32 bytes"));
    }
}
