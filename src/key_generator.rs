use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash as StdHash, Hasher};
use std::str::FromStr;

use rand::RngCore;
use secp256k1::{PublicKey as SecpPublicKey, SecretKey, SECP256K1};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CurrencyError, Result};
use crate::signature::{sign_digest, verify_digest};
use crate::utils::{sha256, Hash};

/// Flavour of a secp256k1 key. Native keys print compressed, Ethereum keys
/// print uncompressed so the Ethereum address can be derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyKind {
    Native,
    Ethereum,
}

impl KeyKind {
    pub fn public_suffix(&self) -> &'static str {
        match self {
            KeyKind::Native => "mpu",
            KeyKind::Ethereum => "epu",
        }
    }

    pub fn private_suffix(&self) -> &'static str {
        match self {
            KeyKind::Native => "mpr",
            KeyKind::Ethereum => "epr",
        }
    }
}

/// Public key of an account key or a suffrage node.
#[derive(Clone, Copy)]
pub struct PublicKey {
    inner: SecpPublicKey,
    kind: KeyKind,
}

impl PublicKey {
    pub fn new(inner: SecpPublicKey, kind: KeyKind) -> Self {
        Self { inner, kind }
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn inner(&self) -> &SecpPublicKey {
        &self.inner
    }

    /// 65-byte SEC1 uncompressed encoding.
    pub fn uncompressed(&self) -> [u8; 65] {
        self.inner.serialize_uncompressed()
    }

    pub fn verify(&self, digest: &Hash, signature: &[u8]) -> Result<bool> {
        verify_digest(&self.inner, digest, signature)
    }

    fn body(&self) -> String {
        match self.kind {
            KeyKind::Native => hex::encode(self.inner.serialize()),
            KeyKind::Ethereum => hex::encode(self.inner.serialize_uncompressed()),
        }
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.inner.serialize() == other.inner.serialize()
    }
}

impl Eq for PublicKey {}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.kind, self.inner.serialize()).cmp(&(other.kind, other.inner.serialize()))
    }
}

impl StdHash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.inner.serialize().hash(state);
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.body(), self.kind.public_suffix())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl FromStr for PublicKey {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self> {
        let (body, kind) = if let Some(body) = s.strip_suffix(KeyKind::Native.public_suffix()) {
            (body, KeyKind::Native)
        } else if let Some(body) = s.strip_suffix(KeyKind::Ethereum.public_suffix()) {
            (body, KeyKind::Ethereum)
        } else {
            return Err(CurrencyError::Crypto(format!("Unknown public key type: {}", s)));
        };
        let bytes = hex::decode(body)
            .map_err(|e| CurrencyError::Crypto(format!("Invalid public key hex: {}", e)))?;
        let inner = SecpPublicKey::from_slice(&bytes)?;
        Ok(Self { inner, kind })
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Private key; only used to produce detached signatures.
#[derive(Clone)]
pub struct PrivateKey {
    inner: SecretKey,
    kind: KeyKind,
}

impl PrivateKey {
    /// Generates a fresh random key.
    pub fn random(kind: KeyKind) -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; 32];
        loop {
            rng.fill_bytes(&mut bytes);
            if let Ok(inner) = SecretKey::from_slice(&bytes) {
                return Self { inner, kind };
            }
        }
    }

    /// Deterministic key derived from a seed (SHA-256 of the seed bytes).
    pub fn from_seed(seed: &[u8], kind: KeyKind) -> Result<Self> {
        let digest = sha256(&[seed]);
        let inner = SecretKey::from_slice(digest.as_bytes())?;
        Ok(Self { inner, kind })
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::new(SecpPublicKey::from_secret_key(SECP256K1, &self.inner), self.kind)
    }

    pub fn sign(&self, digest: &Hash) -> Result<Vec<u8>> {
        sign_digest(&self.inner, digest)
    }
}

impl fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", hex::encode(self.inner.secret_bytes()), self.kind.private_suffix())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", self.public_key())
    }
}

impl FromStr for PrivateKey {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self> {
        let (body, kind) = if let Some(body) = s.strip_suffix(KeyKind::Native.private_suffix()) {
            (body, KeyKind::Native)
        } else if let Some(body) = s.strip_suffix(KeyKind::Ethereum.private_suffix()) {
            (body, KeyKind::Ethereum)
        } else {
            return Err(CurrencyError::Crypto("Unknown private key type".to_string()));
        };
        let bytes = hex::decode(body)
            .map_err(|e| CurrencyError::Crypto(format!("Invalid private key hex: {}", e)))?;
        let inner = SecretKey::from_slice(&bytes)?;
        Ok(Self { inner, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_string_roundtrip() {
        for kind in [KeyKind::Native, KeyKind::Ethereum] {
            let key = PrivateKey::random(kind).public_key();
            let s = key.to_string();
            assert!(s.ends_with(kind.public_suffix()));
            let parsed: PublicKey = s.parse().unwrap();
            assert_eq!(parsed, key);
        }
    }

    #[test]
    fn test_private_key_from_seed_deterministic() {
        let a = PrivateKey::from_seed(b"alice", KeyKind::Native).unwrap();
        let b = PrivateKey::from_seed(b"alice", KeyKind::Native).unwrap();
        assert_eq!(a.public_key(), b.public_key());

        let restored: PrivateKey = a.to_string().parse().unwrap();
        assert_eq!(restored.public_key(), a.public_key());
    }

    #[test]
    fn test_sign_verify_with_key_types() {
        let key = PrivateKey::from_seed(b"signer", KeyKind::Native).unwrap();
        let digest = sha256(&[b"payload"]);
        let sig = key.sign(&digest).unwrap();
        assert!(key.public_key().verify(&digest, &sig).unwrap());

        let other = PrivateKey::from_seed(b"other", KeyKind::Native).unwrap();
        assert!(!other.public_key().verify(&digest, &sig).unwrap());
    }

    #[test]
    fn test_same_curve_point_different_kind_not_equal() {
        let native = PrivateKey::from_seed(b"k", KeyKind::Native).unwrap().public_key();
        let eth = PrivateKey::from_seed(b"k", KeyKind::Ethereum).unwrap().public_key();
        assert_ne!(native, eth);
        assert!("00mpu".parse::<PublicKey>().is_err());
        assert!("abc".parse::<PublicKey>().is_err());
    }
}
