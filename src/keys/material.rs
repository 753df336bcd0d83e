//! Private key material.
//!
//! # Security
//! - Secret bytes are zeroized on drop (including every clone)
//! - `Debug` never prints the secret
//! - Raw bytes are only reachable inside the crate, at sign time

use bitcoin::secp256k1::SecretKey;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::blockchain::types::{SettlementError, SettlementResult};

/// Bounded retries for drawing a valid secp256k1 scalar.
const MAX_GENERATION_ATTEMPTS: usize = 16;

/// A 32-byte secp256k1 secret key, shared by both ledger families.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    secret: [u8; 32],
}

impl KeyMaterial {
    /// Generate a fresh key from OS entropy.
    pub fn generate() -> SettlementResult<Self> {
        let mut bytes = [0u8; 32];
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            OsRng
                .try_fill_bytes(&mut bytes)
                .map_err(|e| SettlementError::KeyGeneration(format!("entropy source: {}", e)))?;
            if SecretKey::from_slice(&bytes).is_ok() {
                let material = Self { secret: bytes };
                bytes.zeroize();
                return Ok(material);
            }
        }
        bytes.zeroize();
        Err(SettlementError::KeyGeneration(
            "could not draw a valid secp256k1 scalar".to_string(),
        ))
    }

    /// Build from raw bytes, rejecting zero or out-of-range scalars.
    pub fn from_bytes(bytes: &[u8]) -> SettlementResult<Self> {
        let key = SecretKey::from_slice(bytes)
            .map_err(|e| SettlementError::SigningError(format!("invalid secret key: {}", e)))?;
        Ok(Self {
            secret: key.secret_bytes(),
        })
    }

    /// Build from a hex string, with or without `0x`.
    pub fn from_hex(hex_key: &str) -> SettlementResult<Self> {
        let trimmed = hex_key.trim();
        let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let mut raw = hex::decode(stripped)
            .map_err(|e| SettlementError::SigningError(format!("invalid key encoding: {}", e)))?;
        let result = Self::from_bytes(&raw);
        raw.zeroize();
        result
    }

    /// `0x`-prefixed lowercase hex.
    pub(crate) fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.secret))
    }

    pub(crate) fn expose(&self) -> &[u8; 32] {
        &self.secret
    }

    pub(crate) fn secret_key(&self) -> SettlementResult<SecretKey> {
        SecretKey::from_slice(&self.secret)
            .map_err(|e| SettlementError::SigningError(format!("invalid secret key: {}", e)))
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.secret
            .iter()
            .zip(other.secret.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for KeyMaterial {}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_generate_distinct() {
        let a = KeyMaterial::generate().unwrap();
        let b = KeyMaterial::generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_round_trip() {
        let key = KeyMaterial::from_hex(TEST_KEY).unwrap();
        assert_eq!(key.to_hex(), format!("0x{}", TEST_KEY));
        assert_eq!(KeyMaterial::from_hex(&key.to_hex()).unwrap(), key);
    }

    #[test]
    fn test_zero_key_rejected() {
        assert!(KeyMaterial::from_bytes(&[0u8; 32]).is_err());
        assert!(KeyMaterial::from_hex("not hex").is_err());
    }

    #[test]
    fn test_debug_redacted() {
        let key = KeyMaterial::from_hex(TEST_KEY).unwrap();
        let rendered = format!("{:?}", key);
        assert_eq!(rendered, "KeyMaterial(<redacted>)");
        assert!(!rendered.contains("ac09"));
    }
}
