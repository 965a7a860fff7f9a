//! Local FHE runtime
//!
//! `LocalFhevm` plays every remote party of the BMI dApp inside one process:
//! - encryption provider: encrypts inputs with the client key
//! - chain: hosts the calculator contract and evaluates the category circuit
//!   on ciphertexts when a transaction is confirmed
//! - decryption oracle: issues decryption signatures and decrypts handles for
//!   their owners only
//!
//! All TFHE work runs on the blocking pool.

use crate::ciphertext::EncryptedU32;
use crate::evaluator::evaluate_category;
use crate::keys::KeySet;
use crate::{FheConfig, FheError, FheResult};
use async_trait::async_trait;
use fhe_bmi_calculator::{
    input_binding_digest, Address, ChainConnector, ChainId, CiphertextHandle, Collaborators,
    ContractCall, ContractEvent, ContractValue, DecryptionError, DecryptionOracle,
    DecryptionSignature, EncryptedInputs, EncryptionError, EncryptionProvider, SignatureCache,
    SignatureError, TransactionError, TransactionReceipt, TxHash,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Submitted but not yet executed calculation
#[derive(Clone)]
struct PendingCalculation {
    from: Address,
    contract: Address,
    height: Vec<u8>,
    weight: Vec<u8>,
}

/// Ciphertext stored under a handle, with its access list
struct StoredCiphertext {
    bytes: Vec<u8>,
    owner: Address,
    contract: Address,
}

#[derive(Default)]
struct FhevmState {
    block_number: u64,
    nonce: u64,
    pending: HashMap<TxHash, PendingCalculation>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    categories: HashMap<(Address, Address), CiphertextHandle>,
    ciphertexts: HashMap<CiphertextHandle, StoredCiphertext>,
}

/// In-process FHE chain, relayer and KMS
pub struct LocalFhevm {
    config: FheConfig,
    keys: Arc<KeySet>,
    /// Key authenticating issued decryption signatures
    mac_key: [u8; 32],
    state: RwLock<FhevmState>,
}

impl LocalFhevm {
    /// Create a runtime around existing keys
    pub fn with_keys(config: FheConfig, keys: Arc<KeySet>) -> FheResult<Self> {
        config.validate()?;
        if !keys.matches_config(&config) {
            return Err(FheError::ConfigError(
                "keys were generated for a different configuration".into(),
            ));
        }

        Ok(Self {
            config,
            keys,
            mac_key: rand::random(),
            state: RwLock::new(FhevmState::default()),
        })
    }

    /// Generate keys on the blocking pool and start a runtime
    pub async fn start(config: FheConfig) -> FheResult<Arc<Self>> {
        info!("Generating FHE keys, this takes a few seconds...");
        let keygen_config = config.clone();
        let keys = tokio::task::spawn_blocking(move || KeySet::generate(&keygen_config)).await??;
        Ok(Arc::new(Self::with_keys(config, Arc::new(keys))?))
    }

    pub fn config(&self) -> &FheConfig {
        &self.config
    }

    /// Address the calculator contract is deployed at
    pub fn contract_address(&self) -> Address {
        self.config.contract_address
    }

    pub fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    pub fn block_number(&self) -> u64 {
        self.state.read().block_number
    }

    /// Wire this runtime in as all three collaborators
    pub fn collaborators(self: &Arc<Self>, signatures: Arc<dyn SignatureCache>) -> Collaborators {
        Collaborators {
            encryption: self.clone(),
            chain: self.clone(),
            oracle: self.clone(),
            signatures,
        }
    }

    fn signature_mac(
        &self,
        account: Address,
        contract: Address,
        issued_at: u64,
        expires_at: u64,
    ) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new_keyed(&self.mac_key);
        hasher.update(b"fhe-bmi/user-decrypt/v1");
        hasher.update(account.as_bytes());
        hasher.update(contract.as_bytes());
        hasher.update(&issued_at.to_le_bytes());
        hasher.update(&expires_at.to_le_bytes());
        hasher.finalize()
    }

    fn verify_signature(&self, signature: &DecryptionSignature) -> bool {
        let expected = self.signature_mac(
            signature.account,
            signature.contract,
            signature.issued_at,
            signature.expires_at,
        );
        match <[u8; 32]>::try_from(signature.signature.as_slice()) {
            // blake3::Hash comparison is constant time
            Ok(bytes) => expected == bytes,
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for LocalFhevm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFhevm")
            .field("chain_id", &self.config.chain_id)
            .field("contract", &self.config.contract_address)
            .field("keys", &self.keys)
            .finish()
    }
}

#[async_trait]
impl EncryptionProvider for LocalFhevm {
    async fn encrypt(
        &self,
        contract: Address,
        user: Address,
        inputs: &[u32],
    ) -> Result<EncryptedInputs, EncryptionError> {
        if inputs.is_empty() {
            return Err(EncryptionError::MalformedInput("no inputs".into()));
        }

        let keys = self.keys.clone();
        let values = inputs.to_vec();
        let ciphertexts = tokio::task::spawn_blocking(move || {
            values
                .iter()
                .map(|value| EncryptedU32::encrypt(*value, &keys).and_then(|ct| ct.to_bytes()))
                .collect::<FheResult<Vec<_>>>()
        })
        .await
        .map_err(FheError::from)??;

        let proof = input_binding_digest(contract, user, &ciphertexts).to_vec();
        debug!("Encrypted {} inputs for {}", ciphertexts.len(), user.short());
        Ok(EncryptedInputs { ciphertexts, proof })
    }
}

#[async_trait]
impl ChainConnector for LocalFhevm {
    async fn submit_transaction(
        &self,
        from: Address,
        contract: Address,
        call: ContractCall,
    ) -> Result<TxHash, TransactionError> {
        if contract != self.config.contract_address {
            return Err(TransactionError::Reverted(format!("no contract at {}", contract)));
        }

        let (height, weight, input_proof) = match call {
            ContractCall::CalculateBmiCategory {
                height,
                weight,
                input_proof,
            } => (height, weight, input_proof),
            other => {
                return Err(TransactionError::Rpc(format!(
                    "{} is not a transaction",
                    other.method_name()
                )))
            }
        };

        let expected = input_binding_digest(contract, from, &[height.clone(), weight.clone()]);
        if input_proof != expected {
            return Err(TransactionError::Reverted("invalid input proof".into()));
        }

        let mut state = self.state.write();
        state.nonce += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.config.chain_id.0.to_le_bytes());
        hasher.update(from.as_bytes());
        hasher.update(&state.nonce.to_le_bytes());
        let tx = TxHash(*hasher.finalize().as_bytes());

        state.pending.insert(
            tx,
            PendingCalculation {
                from,
                contract,
                height,
                weight,
            },
        );
        debug!("Accepted {} from {}", tx, from.short());
        Ok(tx)
    }

    async fn await_confirmation(&self, tx: TxHash) -> Result<TransactionReceipt, TransactionError> {
        // Stays pending until evaluated, so a failed confirmation can be retried
        let pending = {
            let state = self.state.read();
            if let Some(receipt) = state.receipts.get(&tx) {
                return Ok(receipt.clone());
            }
            state
                .pending
                .get(&tx)
                .cloned()
                .ok_or_else(|| TransactionError::Rpc(format!("unknown transaction {}", tx)))?
        };

        let keys = self.keys.clone();
        let (height, weight) = (pending.height, pending.weight);
        let category = tokio::task::spawn_blocking(move || -> FheResult<Vec<u8>> {
            keys.install();
            let height = EncryptedU32::from_bytes(&height)?;
            let weight = EncryptedU32::from_bytes(&weight)?;
            evaluate_category(&height, &weight).to_bytes()
        })
        .await
        .map_err(FheError::from)??;

        let mut state = self.state.write();
        // A concurrent confirmation of the same transaction got here first
        if state.pending.remove(&tx).is_none() {
            if let Some(receipt) = state.receipts.get(&tx) {
                return Ok(receipt.clone());
            }
        }
        state.block_number += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&tx.0);
        hasher.update(&state.block_number.to_le_bytes());
        let handle = CiphertextHandle(*hasher.finalize().as_bytes());

        state.ciphertexts.insert(
            handle,
            StoredCiphertext {
                bytes: category,
                owner: pending.from,
                contract: pending.contract,
            },
        );
        state.categories.insert((pending.contract, pending.from), handle);

        let receipt = TransactionReceipt {
            tx_hash: tx,
            block_number: state.block_number,
            events: vec![ContractEvent::BmiCalculated {
                user: pending.from,
                handle,
            }],
        };
        state.receipts.insert(tx, receipt.clone());
        info!("Block {}: BMI category stored as {}", state.block_number, handle.short());
        Ok(receipt)
    }

    async fn read_contract_state(
        &self,
        contract: Address,
        call: ContractCall,
    ) -> Result<ContractValue, TransactionError> {
        if contract != self.config.contract_address {
            return Ok(ContractValue::Empty);
        }
        match call {
            ContractCall::BmiCategoryOf { user } => Ok(self
                .state
                .read()
                .categories
                .get(&(contract, user))
                .copied()
                .map(ContractValue::Handle)
                .unwrap_or(ContractValue::Empty)),
            ContractCall::ProtocolId => Ok(ContractValue::Uint(self.config.protocol_id)),
            other => Err(TransactionError::Rpc(format!(
                "{} is not a read call",
                other.method_name()
            ))),
        }
    }
}

#[async_trait]
impl DecryptionOracle for LocalFhevm {
    async fn request_signature(
        &self,
        contract: Address,
        user: Address,
        validity: Duration,
    ) -> Result<DecryptionSignature, SignatureError> {
        if validity.is_zero() {
            return Err(SignatureError::Failed("validity must be positive".into()));
        }

        let issued_at = now();
        let expires_at = issued_at.saturating_add(validity.as_secs().max(1));
        let mac = self.signature_mac(user, contract, issued_at, expires_at);
        debug!("Issued decryption signature for {} until {}", user.short(), expires_at);

        Ok(DecryptionSignature {
            account: user,
            contract,
            signature: mac.as_bytes().to_vec(),
            issued_at,
            expires_at,
        })
    }

    async fn decrypt(
        &self,
        handle: CiphertextHandle,
        signature: &DecryptionSignature,
    ) -> Result<u64, DecryptionError> {
        if !self.verify_signature(signature) || !signature.is_valid_at(now()) {
            return Err(DecryptionError::Unauthorized);
        }

        let bytes = {
            let state = self.state.read();
            let stored = state.ciphertexts.get(&handle).ok_or(DecryptionError::HandleInvalid)?;
            if !signature.covers(stored.owner, stored.contract) {
                return Err(DecryptionError::Unauthorized);
            }
            stored.bytes.clone()
        };

        let keys = self.keys.clone();
        let value = tokio::task::spawn_blocking(move || -> FheResult<u32> {
            Ok(EncryptedU32::from_bytes(&bytes)?.decrypt(&keys))
        })
        .await
        .map_err(FheError::from)??;

        Ok(value as u64)
    }
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhe_bmi_calculator::BmiCategory;

    const ALICE: Address = Address([0xa1; 20]);
    const BOB: Address = Address([0xb0; 20]);

    #[tokio::test]
    async fn test_end_to_end_with_access_control() {
        let fhevm = LocalFhevm::start(FheConfig::default()).await.unwrap();
        let contract = fhevm.contract_address();

        let inputs = fhevm.encrypt(contract, ALICE, &[170, 65]).await.unwrap();
        let call = ContractCall::calculate(inputs).unwrap();

        // Proof is bound to Alice
        let err = fhevm.submit_transaction(BOB, contract, call.clone()).await.unwrap_err();
        assert_eq!(err, TransactionError::Reverted("invalid input proof".into()));

        let tx = fhevm.submit_transaction(ALICE, contract, call).await.unwrap();
        let receipt = fhevm.await_confirmation(tx).await.unwrap();
        let handle = receipt.result_handle_for(ALICE).unwrap();
        assert_eq!(fhevm.block_number(), 1);
        assert_eq!(
            fhevm
                .read_contract_state(contract, ContractCall::BmiCategoryOf { user: ALICE })
                .await
                .unwrap(),
            ContractValue::Handle(handle)
        );

        let alice_sig = fhevm
            .request_signature(contract, ALICE, Duration::from_secs(60))
            .await
            .unwrap();
        let value = fhevm.decrypt(handle, &alice_sig).await.unwrap();
        assert_eq!(value, BmiCategory::Normal.index() as u64);

        let bob_sig = fhevm
            .request_signature(contract, BOB, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            fhevm.decrypt(handle, &bob_sig).await,
            Err(DecryptionError::Unauthorized)
        );

        // A forged signature is not accepted
        let forged = DecryptionSignature {
            signature: vec![0; 32],
            ..alice_sig
        };
        assert_eq!(
            fhevm.decrypt(handle, &forged).await,
            Err(DecryptionError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn test_failed_evaluation_keeps_transaction_pending() {
        let fhevm = LocalFhevm::start(FheConfig::default()).await.unwrap();
        let contract = fhevm.contract_address();

        // Correctly bound, but not a ciphertext
        let (height, weight) = (vec![0xde, 0xad], vec![0xbe, 0xef]);
        let input_proof = input_binding_digest(contract, ALICE, &[height.clone(), weight.clone()]);
        let call = ContractCall::CalculateBmiCategory {
            height,
            weight,
            input_proof: input_proof.to_vec(),
        };
        let tx = fhevm.submit_transaction(ALICE, contract, call).await.unwrap();

        for _ in 0..2 {
            let err = fhevm.await_confirmation(tx).await.unwrap_err();
            assert!(matches!(err, TransactionError::Reverted(_)), "{:?}", err);
        }
        assert!(fhevm.state.read().pending.contains_key(&tx));
        assert_eq!(fhevm.block_number(), 0);
    }

    #[tokio::test]
    async fn test_repeated_confirmation_returns_same_receipt() {
        let fhevm = LocalFhevm::start(FheConfig::default()).await.unwrap();
        let contract = fhevm.contract_address();

        let inputs = fhevm.encrypt(contract, ALICE, &[180, 95]).await.unwrap();
        let call = ContractCall::calculate(inputs).unwrap();
        let tx = fhevm.submit_transaction(ALICE, contract, call).await.unwrap();

        let first = fhevm.await_confirmation(tx).await.unwrap();
        let second = fhevm.await_confirmation(tx).await.unwrap();
        assert_eq!(first, second);
        assert!(fhevm.state.read().pending.is_empty());
        assert_eq!(fhevm.block_number(), 1);
    }
}
