use thiserror::Error;

/// Crate-level error. Anything surfacing as `CurrencyError` out of the
/// processing engine is fatal for the height being processed; expected
/// per-operation rejections travel as `ProcessReason` instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, CurrencyError>;

impl From<secp256k1::Error> for CurrencyError {
    fn from(err: secp256k1::Error) -> Self {
        CurrencyError::Crypto(err.to_string())
    }
}

impl From<serde_json::Error> for CurrencyError {
    fn from(err: serde_json::Error) -> Self {
        CurrencyError::Codec(format!("json: {}", err))
    }
}

impl From<serde_cbor::Error> for CurrencyError {
    fn from(err: serde_cbor::Error) -> Self {
        CurrencyError::Codec(format!("cbor: {}", err))
    }
}

impl From<std::io::Error> for CurrencyError {
    fn from(err: std::io::Error) -> Self {
        CurrencyError::Io(err.to_string())
    }
}
