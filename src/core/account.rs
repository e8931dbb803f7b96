//! Weighted multi-key account ownership.
//!
//! An account is owned by 1..=10 weighted keys and a threshold. A set of
//! signers satisfies the account when the summed weight of the keys they
//! match reaches the threshold.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::address::Address;
use crate::core::amount::CurrencyId;
use crate::core::operation::ValidationError;
use crate::core::processor::ProcessReason;
use crate::key_generator::PublicKey;
use crate::utils::{sha256, Hash};

pub const MIN_KEY_WEIGHT: u32 = 1;
pub const MAX_KEY_WEIGHT: u32 = 100;
pub const MAX_KEYS_IN_ACCOUNT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    key: PublicKey,
    weight: u32,
}

impl AccountKey {
    pub fn new(key: PublicKey, weight: u32) -> Result<Self, ValidationError> {
        if !(MIN_KEY_WEIGHT..=MAX_KEY_WEIGHT).contains(&weight) {
            return Err(ValidationError::InvalidKeys(format!(
                "key weight must be {}..={}, got {}",
                MIN_KEY_WEIGHT, MAX_KEY_WEIGHT, weight
            )));
        }
        Ok(Self { key, weight })
    }

    pub fn key(&self) -> &PublicKey {
        &self.key
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }
}

/// Ordered key set plus signing threshold.
///
/// Keys are kept sorted so the content hash (and therefore the derived
/// address) does not depend on the order the keys were supplied in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AccountKeys {
    keys: Vec<AccountKey>,
    threshold: u32,
}

impl AccountKeys {
    pub fn new(mut keys: Vec<AccountKey>, threshold: u32) -> Result<Self, ValidationError> {
        keys.sort();
        let set = Self { keys, threshold };
        set.is_valid()?;
        Ok(set)
    }

    pub fn keys(&self) -> &[AccountKey] {
        &self.keys
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn key(&self, key: &PublicKey) -> Option<&AccountKey> {
        self.keys.iter().find(|k| &k.key == key)
    }

    pub fn total_weight(&self) -> u32 {
        self.keys.iter().map(|k| k.weight).sum()
    }

    pub fn is_valid(&self) -> Result<(), ValidationError> {
        if self.keys.is_empty() || self.keys.len() > MAX_KEYS_IN_ACCOUNT {
            return Err(ValidationError::InvalidKeys(format!(
                "number of keys must be 1..={}, got {}",
                MAX_KEYS_IN_ACCOUNT,
                self.keys.len()
            )));
        }
        if !(MIN_KEY_WEIGHT..=MAX_KEY_WEIGHT).contains(&self.threshold) {
            return Err(ValidationError::InvalidKeys(format!(
                "threshold must be {}..={}, got {}",
                MIN_KEY_WEIGHT, MAX_KEY_WEIGHT, self.threshold
            )));
        }
        let mut seen = BTreeSet::new();
        for k in &self.keys {
            if !(MIN_KEY_WEIGHT..=MAX_KEY_WEIGHT).contains(&k.weight) {
                return Err(ValidationError::InvalidKeys(format!(
                    "key weight must be {}..={}, got {}",
                    MIN_KEY_WEIGHT, MAX_KEY_WEIGHT, k.weight
                )));
            }
            if !seen.insert(&k.key) {
                return Err(ValidationError::InvalidKeys(format!(
                    "duplicated key {}",
                    k.key
                )));
            }
        }
        if self.total_weight() < self.threshold {
            return Err(ValidationError::InvalidKeys(format!(
                "sum of weights {} under threshold {}",
                self.total_weight(),
                self.threshold
            )));
        }
        Ok(())
    }

    /// Content hash; seed of the native address.
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(self.keys.len() * 72 + 4);
        for k in &self.keys {
            buf.extend_from_slice(k.key.to_string().as_bytes());
            buf.extend_from_slice(&k.weight.to_be_bytes());
        }
        buf.extend_from_slice(&self.threshold.to_be_bytes());
        sha256(&[&buf])
    }

    /// Same keys with the same weights and threshold.
    pub fn equal(&self, other: &AccountKeys) -> bool {
        self.hash() == other.hash()
    }
}

impl<'de> Deserialize<'de> for AccountKeys {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            keys: Vec<AccountKey>,
            threshold: u32,
        }
        let raw = Raw::deserialize(deserializer)?;
        AccountKeys::new(raw.keys, raw.threshold).map_err(serde::de::Error::custom)
    }
}

/// Ledger account. Zero (sentinel) accounts carry no keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    address: Address,
    keys: Option<AccountKeys>,
}

impl Account {
    pub fn new(address: Address, keys: AccountKeys) -> Self {
        Self {
            address,
            keys: Some(keys),
        }
    }

    pub fn zero(currency: &CurrencyId) -> Self {
        Self {
            address: Address::zero(currency),
            keys: None,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn keys(&self) -> Option<&AccountKeys> {
        self.keys.as_ref()
    }

    /// Same address, new keys. Addresses are immutable across key rotation.
    pub fn with_keys(&self, keys: AccountKeys) -> Self {
        Self {
            address: self.address.clone(),
            keys: Some(keys),
        }
    }
}

/// Checks that `signers` satisfy `keys`.
///
/// A signer listed twice is rejected with `DuplicatedSigner`; signers that
/// match no key contribute nothing.
pub fn check_threshold(signers: &[PublicKey], keys: &AccountKeys) -> Result<(), ProcessReason> {
    let mut seen = BTreeSet::new();
    let mut weight: u32 = 0;
    for signer in signers {
        if !seen.insert(signer) {
            return Err(ProcessReason::DuplicatedSigner(signer.to_string()));
        }
        if let Some(k) = keys.key(signer) {
            weight += k.weight;
        }
    }
    if weight < keys.threshold {
        return Err(ProcessReason::InsufficientSignature {
            required: keys.threshold,
            got: weight,
        });
    }
    Ok(())
}
