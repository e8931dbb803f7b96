//! Type tags and document codecs.
//!
//! Polymorphic payloads carry a `_hint` field, `"<type>-v<major>.<minor>.<patch>"`.
//! Decoding goes through serde's closed enums, so a payload whose hint is not
//! known fails to decode. JSON is the human-readable codec, CBOR the compact
//! one; both round-trip every payload.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CurrencyError, Result};

/// Every hint the engine can decode.
pub const KNOWN_HINTS: &[&str] = &[
    "currency-create-accounts-fact-v0.0.1",
    "currency-transfers-fact-v0.0.1",
    "currency-key-updater-fact-v0.0.1",
    "currency-register-fact-v0.0.1",
    "currency-policy-updater-fact-v0.0.1",
    "currency-mint-fact-v0.0.1",
    "suffrage-candidate-fact-v0.0.1",
    "suffrage-join-fact-v0.0.1",
    "suffrage-disjoin-fact-v0.0.1",
    "currency-genesis-currencies-fact-v0.0.1",
    "account-state-value-v0.0.1",
    "balance-state-value-v0.0.1",
    "currency-design-state-value-v0.0.1",
    "suffrage-nodes-state-value-v0.0.1",
    "suffrage-candidates-state-value-v0.0.1",
    "network-policy-state-value-v0.0.1",
    "nil-feeer-v0.0.1",
    "fixed-feeer-v0.0.1",
    "ratio-feeer-v0.0.1",
];

/// Parsed type tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hint {
    type_name: String,
    version: (u32, u32, u32),
}

impl Hint {
    pub fn parse(s: &str) -> Result<Self> {
        let (type_name, version) = s
            .rsplit_once("-v")
            .ok_or_else(|| CurrencyError::Codec(format!("hint {:?} has no version", s)))?;
        if type_name.is_empty()
            || !type_name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(CurrencyError::Codec(format!("invalid hint type in {:?}", s)));
        }
        let parts = version
            .split('.')
            .map(|p| p.parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CurrencyError::Codec(format!("invalid hint version in {:?}: {}", s, e)))?;
        let [major, minor, patch] = parts[..] else {
            return Err(CurrencyError::Codec(format!(
                "hint version in {:?} must be major.minor.patch",
                s
            )));
        };
        Ok(Self {
            type_name: type_name.to_string(),
            version: (major, minor, patch),
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn version(&self) -> (u32, u32, u32) {
        self.version
    }

    pub fn is_known(&self) -> bool {
        let s = self.to_string();
        KNOWN_HINTS.contains(&s.as_str())
    }
}

impl fmt::Display for Hint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor, patch) = self.version;
        write!(f, "{}-v{}.{}.{}", self.type_name, major, minor, patch)
    }
}

impl FromStr for Hint {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self> {
        Hint::parse(s)
    }
}

#[derive(Deserialize)]
struct Hinted {
    #[serde(rename = "_hint")]
    hint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Json,
    Cbor,
}

impl Codec {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Json => Ok(serde_json::to_vec(value)?),
            Codec::Cbor => Ok(serde_cbor::to_vec(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Codec::Json => Ok(serde_json::from_slice(bytes)?),
            Codec::Cbor => Ok(serde_cbor::from_slice(bytes)?),
        }
    }

    /// Reads only the `_hint` of an encoded payload and checks it is known.
    pub fn peek_hint(&self, bytes: &[u8]) -> Result<Hint> {
        let hinted: Hinted = self.decode(bytes)?;
        let hint = Hint::parse(&hinted.hint)?;
        if !hint.is_known() {
            return Err(CurrencyError::Codec(format!("unknown hint {}", hint)));
        }
        Ok(hint)
    }
}
