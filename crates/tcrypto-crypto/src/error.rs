use thiserror::Error;

use crate::keys::KeyRole;
use tcrypto_storage::StorageError;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("insufficient key material: {role} key is {len} bytes (need at least 32)")]
    InsufficientKeyMaterial { role: KeyRole, len: usize },

    #[error("could not get random bytes: {0}")]
    RandomnessUnavailable(String),

    /// Deliberately carries no detail: a wrong key and corrupt ciphertext
    /// must look the same.
    #[error("cipher operation failed")]
    CipherFailure,

    #[error("malformed capsule: {0}")]
    MalformedCapsule(&'static str),

    #[error("capsule authentication failed: {0}")]
    AuthenticationFailure(&'static str),

    #[error("key store unavailable: {0}")]
    KeyLookupFailure(String),

    #[error("invalid key version {0:?}: must be non-empty and must not contain '$'")]
    InvalidKeyVersion(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("transform pipeline produced no data")]
    NoData,

    #[error("validity window does not fit the capsule time fields: {0}")]
    WindowOverflow(u64),

    #[error("key file error: {0}")]
    KeyFile(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CryptoError {
    /// Failures caused by the contents of a stored capsule. These never reach
    /// the caller of `Capsule::open`; the capsule is discarded instead.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CryptoError::CipherFailure
                | CryptoError::MalformedCapsule(_)
                | CryptoError::AuthenticationFailure(_)
                | CryptoError::Transform(_)
                | CryptoError::NoData
        )
    }
}
