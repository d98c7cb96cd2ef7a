use std::time::Duration;

use thiserror::Error;

/// Failure to turn an encrypted payload back into JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    /// The payload is not `iv.ciphertext`.
    #[error("encrypted payload must be `<iv>.<ciphertext>`")]
    MalformedPayload,

    #[error("invalid base64: {0}")]
    Base64(String),

    #[error("decryption key must be 16 or 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("initialization vector must be 16 bytes, got {0}")]
    InvalidIv(usize),

    /// Wrong key, or corrupted ciphertext/padding.
    #[error("ciphertext could not be decrypted")]
    Cipher,

    #[error("decrypted payload is not valid utf-8")]
    InvalidUtf8,
}

impl From<base64::DecodeError> for DecryptError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Base64(err.to_string())
    }
}

/// Failure to obtain a feature snapshot.
///
/// `Clone` because a collapsed refresh hands the same settled result to every
/// waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// No endpoint (api host and client key) to fetch from.
    #[error("no feature endpoint configured")]
    NotConfigured,

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("feature endpoint returned status {0}")]
    Status(u16),

    #[error("could not decode feature payload: {0}")]
    Decode(String),

    #[error("feature fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("payload is encrypted but no decryption key is configured")]
    MissingDecryptionKey,

    #[error(transparent)]
    Decrypt(#[from] DecryptError),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for RepositoryError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Status(status.as_u16()),
            None if err.is_decode() => Self::Decode(err.to_string()),
            None => Self::Fetch(err.to_string()),
        }
    }
}
