use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use sha2::{Digest, Sha256};

use crate::error::{CurrencyError, Result};
use crate::utils::Hash;

/// Domain separator for fact hashes.
pub const FACT_DOMAIN: &str = "CurrencyFact:";
/// Domain separator for operation hashes.
pub const OPERATION_DOMAIN: &str = "CurrencyOperation:";
/// Domain separator for state hashes.
pub const STATE_DOMAIN: &str = "CurrencyState:";

/// Hashes a message with a domain separator. The message is encoded as JSON;
/// struct field order is fixed so the same value always hashes the same.
pub fn hash_message<T: serde::Serialize>(domain: &str, message: &T) -> Result<Hash> {
    let json = serde_json::to_string(message)
        .map_err(|e| CurrencyError::Validation(format!("Failed to serialize message: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update(json.as_bytes());
    Ok(Hash::new(hasher.finalize().into()))
}

/// Signs a 32-byte digest; returns the 64-byte compact (low-S) signature.
pub fn sign_digest(private_key: &SecretKey, digest: &Hash) -> Result<Vec<u8>> {
    let msg = Message::from_digest_slice(digest.as_bytes())
        .map_err(|e| CurrencyError::Signature(format!("Invalid message hash: {}", e)))?;
    let signature = SECP256K1.sign_ecdsa(&msg, private_key);
    Ok(signature.serialize_compact().to_vec())
}

/// Verifies a compact or DER signature over a 32-byte digest.
pub fn verify_digest(public_key: &PublicKey, digest: &Hash, signature: &[u8]) -> Result<bool> {
    let msg = Message::from_digest_slice(digest.as_bytes())
        .map_err(|e| CurrencyError::Signature(format!("Invalid message hash: {}", e)))?;

    let signature = if signature.len() == 64 {
        Signature::from_compact(signature)
            .map_err(|e| CurrencyError::Signature(format!("Invalid compact signature: {}", e)))?
    } else {
        Signature::from_der(signature)
            .map_err(|e| CurrencyError::Signature(format!("Invalid DER signature: {}", e)))?
    };

    Ok(SECP256K1.verify_ecdsa(&msg, &signature, public_key).is_ok())
}
