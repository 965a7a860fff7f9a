//! Calculator Error Types

use crate::types::ChainId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure from the encryption provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Encryption provider unavailable: {0}")]
    Unavailable(String),
}

/// Failure while submitting or confirming a transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Transaction not confirmed after {0} seconds")]
    Timeout(u64),

    #[error("Transaction rejected by user")]
    UserRejected,

    #[error("RPC error: {0}")]
    Rpc(String),
}

/// The user declined the decryption signature prompt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Decryption signature rejected by user")]
    Rejected,

    #[error("Signing failed: {0}")]
    Failed(String),
}

/// Failure from the decryption oracle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("Ciphertext handle is not valid")]
    HandleInvalid,

    #[error("Not authorized to decrypt this handle")]
    Unauthorized,

    #[error("Decryption oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Decrypted value {0} is not a BMI category")]
    InvalidPlaintext(u64),
}

/// Machine-checkable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Encryption,
    TransactionReverted,
    TransactionTimeout,
    TransactionRejected,
    TransactionRpc,
    SignatureRejected,
    DecryptionHandleInvalid,
    DecryptionUnauthorized,
    DecryptionUnavailable,
    ContextChanged,
    NotDeployed,
    WalletNotConnected,
    InvalidInput,
    Busy,
    NoHandle,
    Superseded,
}

/// Errors surfaced by the calculation controller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalculatorError {
    #[error("Encryption failed: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("{0}")]
    Transaction(#[from] TransactionError),

    #[error("{0}")]
    Signature(#[from] SignatureError),

    #[error("Decryption failed: {0}")]
    Decryption(#[from] DecryptionError),

    #[error("Wallet account or network changed, please retry")]
    ContextChanged,

    #[error("FHEBMICalculator is not deployed on chain {0}")]
    NotDeployed(ChainId),

    #[error("Wallet not connected")]
    WalletNotConnected,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Another operation is in progress")]
    Busy,

    #[error("No encrypted result available, calculate first")]
    NoHandle,

    #[error("Request superseded by generation {current} (was {stale})")]
    Superseded { stale: u64, current: u64 },
}

impl CalculatorError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CalculatorError::Encryption(_) => ErrorKind::Encryption,
            CalculatorError::Transaction(e) => match e {
                TransactionError::Reverted(_) => ErrorKind::TransactionReverted,
                TransactionError::Timeout(_) => ErrorKind::TransactionTimeout,
                TransactionError::UserRejected => ErrorKind::TransactionRejected,
                TransactionError::Rpc(_) => ErrorKind::TransactionRpc,
            },
            CalculatorError::Signature(_) => ErrorKind::SignatureRejected,
            CalculatorError::Decryption(e) => match e {
                DecryptionError::HandleInvalid | DecryptionError::InvalidPlaintext(_) => {
                    ErrorKind::DecryptionHandleInvalid
                }
                DecryptionError::Unauthorized => ErrorKind::DecryptionUnauthorized,
                DecryptionError::OracleUnavailable(_) => ErrorKind::DecryptionUnavailable,
            },
            CalculatorError::ContextChanged => ErrorKind::ContextChanged,
            CalculatorError::NotDeployed(_) => ErrorKind::NotDeployed,
            CalculatorError::WalletNotConnected => ErrorKind::WalletNotConnected,
            CalculatorError::InvalidInput(_) => ErrorKind::InvalidInput,
            CalculatorError::Busy => ErrorKind::Busy,
            CalculatorError::NoHandle => ErrorKind::NoHandle,
            CalculatorError::Superseded { .. } => ErrorKind::Superseded,
        }
    }

    /// Whether the error is a stale completion rather than a real failure
    pub fn is_superseded(&self) -> bool {
        matches!(self, CalculatorError::Superseded { .. })
    }
}

/// Result type for calculator operations
pub type CalcResult<T> = Result<T, CalculatorError>;
