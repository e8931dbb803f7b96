//! Account addresses. Two derivation schemes exist for new accounts: the native scheme (hash of the account keys) and the Ethereum-compatible scheme (Keccak-256 of a secp256k1 public key). Both are pure functions of the keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::account::AccountKeys;
use crate::core::amount::CurrencyId;
use crate::core::operation::ValidationError;
use crate::key_generator::{KeyKind, PublicKey};
use crate::utils::keccak256;

/// Suffix of native addresses.
pub const NATIVE_ADDRESS_SUFFIX: &str = "mca";
/// Suffix of Ethereum-compatible addresses.
pub const ETHEREUM_ADDRESS_SUFFIX: &str = "eca";
/// Marker appended to a currency id to form its zero account address.
pub const ZERO_ADDRESS_MARKER: &str = "-X";

const MIN_ADDRESS_BODY_LEN: usize = 3;
const MAX_ADDRESS_BODY_LEN: usize = 100;

/// Address scheme, also the target type of a newly created account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    #[serde(rename = "mca")]
    Native,
    #[serde(rename = "eca")]
    Ethereum,
}

impl AddressKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            AddressKind::Native => NATIVE_ADDRESS_SUFFIX,
            AddressKind::Ethereum => ETHEREUM_ADDRESS_SUFFIX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Result<Self, ValidationError> {
        let address = address.into();
        Self::check(&address)?;
        Ok(Self(address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> AddressKind {
        if self.0.ends_with(ETHEREUM_ADDRESS_SUFFIX) {
            AddressKind::Ethereum
        } else {
            AddressKind::Native
        }
    }

    /// Reserved sink account of a currency; it has no keys.
    pub fn zero(currency: &CurrencyId) -> Self {
        Self(format!(
            "{}{}{}",
            currency, ZERO_ADDRESS_MARKER, NATIVE_ADDRESS_SUFFIX
        ))
    }

    pub fn is_zero(&self) -> bool {
        self.0
            .strip_suffix(NATIVE_ADDRESS_SUFFIX)
            .and_then(|body| body.strip_suffix(ZERO_ADDRESS_MARKER))
            .map(|cid| CurrencyId::new(cid).is_ok())
            .unwrap_or(false)
    }

    fn check(address: &str) -> Result<(), ValidationError> {
        let body = address
            .strip_suffix(NATIVE_ADDRESS_SUFFIX)
            .or_else(|| address.strip_suffix(ETHEREUM_ADDRESS_SUFFIX))
            .ok_or_else(|| {
                ValidationError::InvalidAddress(format!("{:?}: unknown address type", address))
            })?;
        if !(MIN_ADDRESS_BODY_LEN..=MAX_ADDRESS_BODY_LEN).contains(&body.len()) {
            return Err(ValidationError::InvalidAddress(format!(
                "{:?}: body length must be {}..={}",
                address, MIN_ADDRESS_BODY_LEN, MAX_ADDRESS_BODY_LEN
            )));
        }
        if !body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.!$*@".contains(c))
        {
            return Err(ValidationError::InvalidAddress(format!(
                "{:?}: invalid characters",
                address
            )));
        }
        Ok(())
    }
}

/// Native address: base58 of the account keys hash.
pub fn new_address_from_keys(keys: &AccountKeys) -> Address {
    Address(format!(
        "{}{}",
        bs58::encode(keys.hash().as_bytes()).into_string(),
        NATIVE_ADDRESS_SUFFIX
    ))
}

/// Ethereum-compatible address of a single-key account: the last 20 bytes of
/// Keccak-256 over the uncompressed public key (without its 0x04 prefix).
pub fn new_eth_address_from_keys(keys: &AccountKeys) -> Result<Address, ValidationError> {
    match keys.keys() {
        [only] => Ok(eth_address_from_public_key(only.key())),
        _ => Err(ValidationError::InvalidKeys(
            "ethereum address requires exactly one key".to_string(),
        )),
    }
}

pub fn eth_address_from_public_key(key: &PublicKey) -> Address {
    let uncompressed = key.uncompressed();
    let digest = keccak256(&uncompressed[1..]);
    Address(format!(
        "0x{}{}",
        hex::encode(&digest[12..]),
        ETHEREUM_ADDRESS_SUFFIX
    ))
}

/// Derives the address of `keys` under the requested scheme.
pub fn derive_address(keys: &AccountKeys, kind: AddressKind) -> Result<Address, ValidationError> {
    match kind {
        AddressKind::Native => Ok(new_address_from_keys(keys)),
        AddressKind::Ethereum => {
            if keys.keys().iter().any(|k| k.key().kind() != KeyKind::Ethereum) {
                return Err(ValidationError::InvalidKeys(
                    "ethereum address requires an ethereum public key".to_string(),
                ));
            }
            new_eth_address_from_keys(keys)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::new(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::account::AccountKey;
    use crate::key_generator::PrivateKey;

    fn keys(seed: &[u8], kind: KeyKind) -> AccountKeys {
        let pk = PrivateKey::from_seed(seed, kind).unwrap().public_key();
        AccountKeys::new(vec![AccountKey::new(pk, 100).unwrap()], 100).unwrap()
    }

    #[test]
    fn test_address_validation() {
        assert!(Address::new("abcmca").is_ok());
        assert!(Address::new("0xabcdefeca").is_ok());
        assert!(Address::new("abc").is_err());
        assert!(Address::new("abmca").is_err());
        assert!(Address::new("ab cmca").is_err());
    }

    #[test]
    fn test_native_address_deterministic() {
        let k = keys(b"a", KeyKind::Native);
        let first = new_address_from_keys(&k);
        let second = new_address_from_keys(&k);
        assert_eq!(first, second);
        assert_eq!(first.kind(), AddressKind::Native);
        assert_ne!(first, new_address_from_keys(&keys(b"b", KeyKind::Native)));
        assert!(Address::new(first.to_string()).is_ok());
    }

    #[test]
    fn test_eth_address_shape() {
        let k = keys(b"eth", KeyKind::Ethereum);
        let addr = derive_address(&k, AddressKind::Ethereum).unwrap();
        assert!(addr.as_str().starts_with("0x"));
        assert_eq!(addr.as_str().len(), 2 + 40 + 3);
        assert_eq!(addr.kind(), AddressKind::Ethereum);
        assert_eq!(addr, derive_address(&k, AddressKind::Ethereum).unwrap());
    }

    #[test]
    fn test_eth_address_rejects_native_key() {
        let k = keys(b"n", KeyKind::Native);
        assert!(derive_address(&k, AddressKind::Ethereum).is_err());
    }

    #[test]
    fn test_eth_address_known_vector() {
        // Private key 1 maps to the well-known address 0x7e5f...bdf.
        let mut raw = [0u8; 32];
        raw[31] = 1;
        let sk: PrivateKey = format!("{}epr", hex::encode(raw)).parse().unwrap();
        let addr = eth_address_from_public_key(&sk.public_key());
        assert_eq!(addr.as_str(), "0x7e5f4552091a69125d5dfcb7b8c2659029395bdfeca");
    }

    #[test]
    fn test_zero_address() {
        let cid = CurrencyId::new("MCC").unwrap();
        let zero = Address::zero(&cid);
        assert_eq!(zero.as_str(), "MCC-Xmca");
        assert!(zero.is_zero());
        assert!(Address::new(zero.to_string()).is_ok());
        assert!(!Address::new("abcmca").unwrap().is_zero());
    }
}
