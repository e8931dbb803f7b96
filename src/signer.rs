use serde::{Deserialize, Serialize};

use crate::core::address::Address;
use crate::error::Result;
use crate::key_generator::{PrivateKey, PublicKey};
use crate::utils::{hex_bytes, sha256, Hash};

/// Digest actually signed for a fact: SHA-256(network id ‖ fact hash).
pub fn signing_digest(network_id: &[u8], fact_hash: &Hash) -> Hash {
    sha256(&[network_id, fact_hash.as_bytes()])
}

/// Detached signature over a fact. Node-level operations carry the signing
/// node's address so it can be matched against the suffrage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sign {
    signer: PublicKey,
    #[serde(with = "hex_bytes")]
    signature: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    node: Option<Address>,
}

impl Sign {
    /// Account-level signature.
    pub fn new(key: &PrivateKey, network_id: &[u8], fact_hash: &Hash) -> Result<Self> {
        let signature = key.sign(&signing_digest(network_id, fact_hash))?;
        Ok(Self {
            signer: key.public_key(),
            signature,
            node: None,
        })
    }

    /// Node-level signature made by a suffrage (or candidate) node.
    pub fn new_node(
        key: &PrivateKey,
        node: Address,
        network_id: &[u8],
        fact_hash: &Hash,
    ) -> Result<Self> {
        let mut sign = Self::new(key, network_id, fact_hash)?;
        sign.node = Some(node);
        Ok(sign)
    }

    pub fn signer(&self) -> &PublicKey {
        &self.signer
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn node(&self) -> Option<&Address> {
        self.node.as_ref()
    }

    pub fn verify(&self, network_id: &[u8], fact_hash: &Hash) -> Result<bool> {
        self.signer
            .verify(&signing_digest(network_id, fact_hash), &self.signature)
    }
}
