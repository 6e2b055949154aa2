//! KeyStore: in-memory signing key material and the derived account address.

use std::fmt;

use ed25519_dalek::{Signature, Signer as DalekSigner, SigningKey};
use ledgerpay_types::{Address, PublicKey};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::hashing::derive_address;

pub const SEED_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("random source exhausted: {0}")]
    Entropy(String),
    #[error("invalid seed: {0}")]
    InvalidSeed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    Ed25519,
}

/// Signing key material. Not `Clone`; the secret is zeroed when dropped.
pub struct Keypair {
    algorithm: KeyAlgorithm,
    signing_key: SigningKey,
}

impl Keypair {
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::new(self.signing_key.verifying_key().to_bytes())
    }

    pub(crate) fn sign_message(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    fn from_seed_bytes(seed: &[u8; SEED_LEN]) -> Self {
        Self {
            algorithm: KeyAlgorithm::Ed25519,
            signing_key: SigningKey::from_bytes(seed),
        }
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("algorithm", &self.algorithm)
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Owns one keypair for the lifetime of the process and exposes the account
/// address derived from it. Persistence is left to the caller.
#[derive(Debug)]
pub struct KeyStore {
    keypair: Keypair,
    address: Address,
}

impl KeyStore {
    pub fn generate() -> Result<Self, KeyError> {
        let mut seed = Zeroizing::new([0u8; SEED_LEN]);
        OsRng
            .try_fill_bytes(seed.as_mut_slice())
            .map_err(|err| KeyError::Entropy(err.to_string()))?;
        Ok(Self::from_keypair(Keypair::from_seed_bytes(&seed)))
    }

    /// Deterministic derivation from a hex-encoded 32-byte seed.
    pub fn from_seed(seed: &str) -> Result<Self, KeyError> {
        let trimmed = seed.trim();
        let decoded = Zeroizing::new(
            hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
                .map_err(|err| KeyError::InvalidSeed(err.to_string()))?,
        );
        let bytes: Zeroizing<[u8; SEED_LEN]> =
            Zeroizing::new(decoded.as_slice().try_into().map_err(|_| {
                KeyError::InvalidSeed(format!(
                    "expected {SEED_LEN} bytes, got {}",
                    decoded.len()
                ))
            })?);
        Ok(Self::from_seed_bytes(&bytes))
    }

    pub fn from_seed_bytes(seed: &[u8; SEED_LEN]) -> Self {
        Self::from_keypair(Keypair::from_seed_bytes(seed))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        let address = derive_address(&keypair.public_key());
        Self { keypair, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyAlgorithm, KeyError, KeyStore};

    #[test]
    fn seed_derivation_is_deterministic() {
        let seed = "11".repeat(32);
        let a = KeyStore::from_seed(&seed).unwrap();
        let b = KeyStore::from_seed(&format!("0x{seed}")).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.keypair().algorithm(), KeyAlgorithm::Ed25519);
        assert_eq!(a.address(), KeyStore::from_seed_bytes(&[0x11; 32]).address());
    }

    #[test]
    fn rejects_malformed_seeds() {
        for bad in ["zz", "1122", &"11".repeat(33)] {
            let err = KeyStore::from_seed(bad).expect_err("malformed seed");
            assert!(matches!(err, KeyError::InvalidSeed(_)), "{bad}");
        }
    }

    #[test]
    fn generated_keys_differ() {
        let a = KeyStore::generate().unwrap();
        let b = KeyStore::generate().unwrap();
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn debug_output_hides_secret() {
        let store = KeyStore::from_seed_bytes(&[0x42; 32]);
        let rendered = format!("{store:?}");
        assert!(!rendered.contains(&"42".repeat(32)));
        assert!(rendered.contains("public_key"));
    }
}
