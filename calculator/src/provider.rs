//! Collaborator interfaces
//!
//! The controller never encrypts, signs or decrypts anything itself. It
//! drives three collaborators:
//! - [`EncryptionProvider`]: turns plaintext inputs into ciphertexts plus an
//!   input proof bound to a (contract, user) pair
//! - [`ChainConnector`]: submits transactions, waits for receipts, reads
//!   contract state
//! - [`DecryptionOracle`]: obtains the user's decryption signature and
//!   decrypts handles with it

use crate::errors::{DecryptionError, EncryptionError, SignatureError, TransactionError};
use crate::signature::DecryptionSignature;
use crate::types::{Address, CiphertextHandle, TxHash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ciphertexts for a batch of plaintext inputs, with one proof covering all
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedInputs {
    /// One serialized ciphertext per input, in input order
    pub ciphertexts: Vec<Vec<u8>>,
    /// Proof binding the ciphertexts to the contract and user
    pub proof: Vec<u8>,
}

impl EncryptedInputs {
    pub fn len(&self) -> usize {
        self.ciphertexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertexts.is_empty()
    }
}

impl std::fmt::Debug for EncryptedInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedInputs")
            .field("count", &self.ciphertexts.len())
            .field("bytes", &self.ciphertexts.iter().map(Vec::len).sum::<usize>())
            .field("proof", &hex::encode(&self.proof[..self.proof.len().min(8)]))
            .finish()
    }
}

/// Digest binding ciphertexts to the contract and user that may consume them.
///
/// Providers derive their input proof from it; connectors recompute it to
/// reject inputs replayed from another account or contract.
pub fn input_binding_digest(
    contract: Address,
    user: Address,
    ciphertexts: &[Vec<u8>],
) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"fhe-bmi/input-binding/v1");
    hasher.update(contract.as_bytes());
    hasher.update(user.as_bytes());
    for ciphertext in ciphertexts {
        hasher.update(&(ciphertext.len() as u64).to_le_bytes());
        hasher.update(ciphertext);
    }
    *hasher.finalize().as_bytes()
}

/// Calls understood by the BMI contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractCall {
    /// `calculateBMICategory(height, weight, proof)`: stores an encrypted
    /// category for the sender
    CalculateBmiCategory {
        height: Vec<u8>,
        weight: Vec<u8>,
        input_proof: Vec<u8>,
    },
    /// Read the encrypted category handle stored for `user`
    BmiCategoryOf { user: Address },
    /// Read the protocol identifier
    ProtocolId,
}

impl ContractCall {
    /// Build the calculation call from encrypted (height, weight) inputs
    pub fn calculate(inputs: EncryptedInputs) -> Result<Self, EncryptionError> {
        let EncryptedInputs { ciphertexts, proof } = inputs;
        let mut ciphertexts = ciphertexts.into_iter();
        match (ciphertexts.next(), ciphertexts.next(), ciphertexts.next()) {
            (Some(height), Some(weight), None) => Ok(ContractCall::CalculateBmiCategory {
                height,
                weight,
                input_proof: proof,
            }),
            _ => Err(EncryptionError::MalformedInput(
                "expected exactly two ciphertexts (height, weight)".into(),
            )),
        }
    }

    /// Method name as it appears in the contract ABI
    pub fn method_name(&self) -> &'static str {
        match self {
            ContractCall::CalculateBmiCategory { .. } => "calculateBMICategory",
            ContractCall::BmiCategoryOf { .. } => "getBMICategory",
            ContractCall::ProtocolId => "protocolId",
        }
    }
}

/// Value returned from a contract read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractValue {
    Handle(CiphertextHandle),
    Uint(u64),
    Empty,
}

/// Event emitted by the contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractEvent {
    /// `BMICalculated(address indexed user, euint32 bmiCategory)`
    BmiCalculated {
        user: Address,
        handle: CiphertextHandle,
    },
}

/// Confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub events: Vec<ContractEvent>,
}

impl TransactionReceipt {
    /// Handle announced for `user` in this receipt's events
    pub fn result_handle_for(&self, user: Address) -> Option<CiphertextHandle> {
        self.events.iter().find_map(|event| match event {
            ContractEvent::BmiCalculated { user: u, handle } if *u == user => Some(*handle),
            _ => None,
        })
    }
}

/// Produces ciphertexts and input proofs for plaintext values
#[async_trait]
pub trait EncryptionProvider: Send + Sync {
    /// Encrypt `inputs` for consumption by `contract` on behalf of `user`
    async fn encrypt(
        &self,
        contract: Address,
        user: Address,
        inputs: &[u32],
    ) -> Result<EncryptedInputs, EncryptionError>;
}

/// Access to the chain the contract lives on
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Submit a state-changing call from `from`
    async fn submit_transaction(
        &self,
        from: Address,
        contract: Address,
        call: ContractCall,
    ) -> Result<TxHash, TransactionError>;

    /// Wait until the transaction is included
    async fn await_confirmation(&self, tx: TxHash) -> Result<TransactionReceipt, TransactionError>;

    /// Execute a read-only call
    async fn read_contract_state(
        &self,
        contract: Address,
        call: ContractCall,
    ) -> Result<ContractValue, TransactionError>;
}

/// Authorizes and performs user decryption of handles
#[async_trait]
pub trait DecryptionOracle: Send + Sync {
    /// Prompt `user` to authorize decryption for `contract`, valid for `validity`
    async fn request_signature(
        &self,
        contract: Address,
        user: Address,
        validity: Duration,
    ) -> Result<DecryptionSignature, SignatureError>;

    /// Decrypt `handle` using a previously obtained signature
    async fn decrypt(
        &self,
        handle: CiphertextHandle,
        signature: &DecryptionSignature,
    ) -> Result<u64, DecryptionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_digest_depends_on_every_part() {
        let contract = Address([1; 20]);
        let user = Address([2; 20]);
        let cts = vec![vec![1, 2, 3], vec![4, 5]];

        let base = input_binding_digest(contract, user, &cts);
        assert_eq!(base, input_binding_digest(contract, user, &cts));
        assert_ne!(base, input_binding_digest(Address([3; 20]), user, &cts));
        assert_ne!(base, input_binding_digest(contract, Address([3; 20]), &cts));
        // Length prefix keeps ([1,2,3],[4,5]) distinct from ([1,2],[3,4,5])
        assert_ne!(
            base,
            input_binding_digest(contract, user, &[vec![1, 2], vec![3, 4, 5]])
        );
    }

    #[test]
    fn test_calculate_call_requires_two_inputs() {
        let inputs = EncryptedInputs {
            ciphertexts: vec![vec![1], vec![2]],
            proof: vec![9],
        };
        let call = ContractCall::calculate(inputs).unwrap();
        assert_eq!(call.method_name(), "calculateBMICategory");

        let single = EncryptedInputs {
            ciphertexts: vec![vec![1]],
            proof: vec![],
        };
        assert!(ContractCall::calculate(single).is_err());
    }

    #[test]
    fn test_receipt_handle_lookup() {
        let user = Address([5; 20]);
        let handle = CiphertextHandle([8; 32]);
        let receipt = TransactionReceipt {
            tx_hash: TxHash([0; 32]),
            block_number: 1,
            events: vec![ContractEvent::BmiCalculated { user, handle }],
        };

        assert_eq!(receipt.result_handle_for(user), Some(handle));
        assert_eq!(receipt.result_handle_for(Address([6; 20])), None);
    }
}
