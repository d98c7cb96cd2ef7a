use thiserror::Error;

use crate::{ConfigError, DecryptError, RepositoryError};

/// Unified error type for the convenience entry points.
///
/// Returned by methods like [`FeatureDefinitions::from_file()`](crate::FeatureDefinitions::from_file)
/// and [`Client::set_encrypted_features()`](crate::Client::set_encrypted_features).
#[derive(Debug, Error)]
pub enum GatekeepError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "binary-cache")]
    #[error(transparent)]
    Serialize(#[from] crate::serial::SerializeError),

    #[cfg(feature = "binary-cache")]
    #[error(transparent)]
    Deserialize(#[from] crate::serial::DeserializeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_pass_through() {
        let err = GatekeepError::from(RepositoryError::MissingDecryptionKey);
        assert_eq!(
            err.to_string(),
            "payload is encrypted but no decryption key is configured"
        );

        let err = GatekeepError::from(ConfigError::InvalidCoverage(2.0));
        assert_eq!(err.to_string(), ConfigError::InvalidCoverage(2.0).to_string());
    }

    #[test]
    fn io_converts() {
        let err: GatekeepError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, GatekeepError::Io(_)));
    }
}
