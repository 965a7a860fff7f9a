//! FHE-BMI Local Runtime
//!
//! Fully Homomorphic Encryption using TFHE-rs.
//! Computes BMI categories on encrypted height and weight without ever
//! seeing either value.
//!
//! # Key Features:
//! - Encrypt/decrypt u32 measurements
//! - Homomorphic category circuit (multiply, compare, select)
//! - Input proofs binding ciphertexts to (contract, account)
//! - Owner-only decryption behind MAC-authenticated signatures
//!
//! # Architecture:
//! ```text
//!  EncryptedCalculationController
//!        │ encrypt        │ submit / confirm / read      │ sign / decrypt
//!        ▼                ▼                              ▼
//!  ┌───────────────────────────────────────────────────────────────┐
//!  │                          LocalFhevm                           │
//!  │  ClientKey ──▶ ciphertexts     ServerKey ──▶ evaluate_category │
//!  │  handle ACL ◀── owner, contract      MAC key ──▶ signatures    │
//!  └───────────────────────────────────────────────────────────────┘
//! ```

pub mod ciphertext;
pub mod errors;
pub mod evaluator;
pub mod keys;
pub mod runtime;

pub use ciphertext::EncryptedU32;
pub use errors::FheError;
pub use evaluator::{evaluate_category, WEIGHT_SCALE};
pub use keys::KeySet;
pub use runtime::LocalFhevm;

use fhe_bmi_calculator::{Address, ChainId};

/// Address of the first contract deployed on a fresh hardhat node
pub const LOCAL_CONTRACT_ADDRESS: Address = Address([
    0x5f, 0xbd, 0xb2, 0x31, 0x56, 0x78, 0xaf, 0xec, 0xb3, 0x67, 0xf0, 0x32, 0xd9, 0x3f, 0x64, 0x2f,
    0x64, 0x18, 0x0a, 0xa3,
]);

/// Protocol identifier reported by the local contract
pub const LOCAL_PROTOCOL_ID: u64 = 10001;

/// FHE Configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FheConfig {
    /// Security parameter (bits)
    pub security_bits: u32,
    /// Chain the runtime pretends to be
    pub chain_id: ChainId,
    /// Address the calculator contract is hosted at
    pub contract_address: Address,
    /// Value returned by `protocolId()`
    pub protocol_id: u64,
}

impl Default for FheConfig {
    fn default() -> Self {
        Self {
            security_bits: 128,
            chain_id: ChainId::HARDHAT,
            contract_address: LOCAL_CONTRACT_ADDRESS,
            protocol_id: LOCAL_PROTOCOL_ID,
        }
    }
}

impl FheConfig {
    pub fn with_contract_address(mut self, address: Address) -> Self {
        self.contract_address = address;
        self
    }

    pub fn with_chain_id(mut self, chain_id: ChainId) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Only the default 128-bit parameter set is supported
    pub fn validate(&self) -> FheResult<()> {
        if self.security_bits != 128 {
            return Err(FheError::ConfigError(format!(
                "unsupported security level {} bits, expected 128",
                self.security_bits
            )));
        }
        if self.contract_address.is_zero() {
            return Err(FheError::ConfigError("contract address must not be zero".into()));
        }
        Ok(())
    }

    /// Hash of the parameters keys depend on
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"fhe-bmi/keys/v1");
        hasher.update(&self.security_bits.to_le_bytes());
        *hasher.finalize().as_bytes()
    }
}

/// Result type for FHE operations
pub type FheResult<T> = Result<T, FheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = FheConfig::default();
        assert_eq!(config.security_bits, 128);
        assert_eq!(config.chain_id, ChainId::HARDHAT);
        assert_eq!(
            config.contract_address.to_string(),
            "0x5fbdb2315678afecb367f032d93f642f64180aa3"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = FheConfig {
            security_bits: 80,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(FheError::ConfigError(_))));

        let config = FheConfig::default().with_contract_address(Address::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_key_hash_ignores_deployment() {
        let a = FheConfig::default();
        let b = FheConfig::default()
            .with_chain_id(ChainId::SEPOLIA)
            .with_contract_address(Address([1; 20]));
        assert_eq!(a.hash(), b.hash());
    }
}
