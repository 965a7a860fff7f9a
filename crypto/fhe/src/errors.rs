//! FHE Error types

use fhe_bmi_calculator::{DecryptionError, EncryptionError, TransactionError};
use thiserror::Error;

/// Errors that can occur in the local FHE runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FheError {
    /// Key generation failed
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Invalid ciphertext
    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Background task panicked or was cancelled
    #[error("Worker task failed: {0}")]
    WorkerFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<FheError> for EncryptionError {
    fn from(err: FheError) -> Self {
        match err {
            FheError::InvalidCiphertext(msg) => EncryptionError::MalformedInput(msg),
            other => EncryptionError::Unavailable(other.to_string()),
        }
    }
}

impl From<FheError> for TransactionError {
    fn from(err: FheError) -> Self {
        match err {
            FheError::InvalidCiphertext(msg) | FheError::SerializationError(msg) => {
                TransactionError::Reverted(msg)
            }
            other => TransactionError::Rpc(other.to_string()),
        }
    }
}

impl From<FheError> for DecryptionError {
    fn from(err: FheError) -> Self {
        match err {
            FheError::InvalidCiphertext(_) | FheError::SerializationError(_) => {
                DecryptionError::HandleInvalid
            }
            other => DecryptionError::OracleUnavailable(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for FheError {
    fn from(err: tokio::task::JoinError) -> Self {
        FheError::WorkerFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let err: TransactionError = FheError::InvalidCiphertext("truncated".into()).into();
        assert_eq!(err, TransactionError::Reverted("truncated".into()));

        let err: DecryptionError = FheError::SerializationError("eof".into()).into();
        assert_eq!(err, DecryptionError::HandleInvalid);

        let err: EncryptionError = FheError::WorkerFailed("panicked".into()).into();
        assert!(matches!(err, EncryptionError::Unavailable(_)));
    }
}
