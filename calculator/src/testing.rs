//! In-memory collaborators
//!
//! Deterministic stand-ins for the encryption provider, the chain and the
//! decryption oracle. They share an [`InMemoryLedger`] so a handle produced
//! by the chain can be decrypted by the oracle. Values are not encrypted,
//! but the access rules are enforced: input proofs must be bound to the
//! submitting account and contract, and only the owner of a handle may
//! decrypt it.
//!
//! Each double can be paused with a [`Gate`] to hold a call at its suspend
//! point, and can be told to fail its next call.

use crate::errors::{DecryptionError, EncryptionError, SignatureError, TransactionError};
use crate::controller::Collaborators;
use crate::provider::{
    input_binding_digest, ChainConnector, ContractCall, ContractEvent, ContractValue,
    DecryptionOracle, EncryptedInputs, EncryptionProvider, TransactionReceipt,
};
use crate::signature::{DecryptionSignature, InMemorySignatureCache};
use crate::types::{Address, BmiCategory, CiphertextHandle, Measurements, TxHash};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Protocol identifier reported by [`InMemoryChain`]
pub const IN_MEMORY_PROTOCOL_ID: u64 = 10001;

/// Holds calls at a suspend point until opened
#[derive(Debug)]
pub struct Gate {
    open: watch::Sender<bool>,
}

impl Gate {
    pub fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self { open }
    }

    pub fn close(&self) {
        self.open.send_replace(false);
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Wait until the gate is open
    pub async fn pass(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives as long as self, so this cannot fail
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct PendingTx {
    from: Address,
    contract: Address,
    category: BmiCategory,
}

#[derive(Debug, Clone, Copy)]
struct StoredValue {
    value: u64,
    owner: Address,
    contract: Address,
}

#[derive(Debug, Default)]
struct LedgerState {
    block_number: u64,
    nonce: u64,
    pending: HashMap<TxHash, PendingTx>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    categories: HashMap<(Address, Address), CiphertextHandle>,
    values: HashMap<CiphertextHandle, StoredValue>,
}

/// Chain state shared by [`InMemoryChain`] and [`InMemoryOracle`]
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_number(&self) -> u64 {
        self.state.read().block_number
    }

    /// Handle currently stored for `user` on `contract`
    pub fn category_handle(&self, contract: Address, user: Address) -> Option<CiphertextHandle> {
        self.state.read().categories.get(&(contract, user)).copied()
    }

    /// Number of handles ever produced
    pub fn handle_count(&self) -> usize {
        self.state.read().values.len()
    }
}

/// Encryption provider that encodes values as little-endian bytes
#[derive(Debug, Default)]
pub struct InMemoryEncryptionProvider {
    calls: AtomicUsize,
    fail_next: Mutex<Option<EncryptionError>>,
    gate: Gate,
}

impl InMemoryEncryptionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, err: EncryptionError) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }
}

#[async_trait]
impl EncryptionProvider for InMemoryEncryptionProvider {
    async fn encrypt(
        &self,
        contract: Address,
        user: Address,
        inputs: &[u32],
    ) -> Result<EncryptedInputs, EncryptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;

        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        if inputs.is_empty() {
            return Err(EncryptionError::MalformedInput("no inputs".into()));
        }

        let ciphertexts: Vec<Vec<u8>> = inputs.iter().map(|v| v.to_le_bytes().to_vec()).collect();
        let proof = input_binding_digest(contract, user, &ciphertexts).to_vec();
        Ok(EncryptedInputs { ciphertexts, proof })
    }
}

/// Chain connector executing the BMI contract in memory
#[derive(Debug)]
pub struct InMemoryChain {
    ledger: Arc<InMemoryLedger>,
    submissions: AtomicUsize,
    stall_confirmations: AtomicBool,
    fail_next_submission: Mutex<Option<TransactionError>>,
    fail_next_confirmation: Mutex<Option<TransactionError>>,
    submit_gate: Gate,
    confirm_gate: Gate,
}

impl InMemoryChain {
    pub fn new(ledger: Arc<InMemoryLedger>) -> Self {
        Self {
            ledger,
            submissions: AtomicUsize::new(0),
            stall_confirmations: AtomicBool::new(false),
            fail_next_submission: Mutex::new(None),
            fail_next_confirmation: Mutex::new(None),
            submit_gate: Gate::new(),
            confirm_gate: Gate::new(),
        }
    }

    /// Accepted transactions
    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Never confirm while set; used to exercise confirmation timeouts
    pub fn stall_confirmations(&self, stall: bool) {
        self.stall_confirmations.store(stall, Ordering::SeqCst);
    }

    pub fn fail_next_submission(&self, err: TransactionError) {
        *self.fail_next_submission.lock() = Some(err);
    }

    pub fn fail_next_confirmation(&self, err: TransactionError) {
        *self.fail_next_confirmation.lock() = Some(err);
    }

    pub fn submit_gate(&self) -> &Gate {
        &self.submit_gate
    }

    pub fn confirm_gate(&self) -> &Gate {
        &self.confirm_gate
    }

    fn decode(ciphertext: &[u8]) -> Result<u32, TransactionError> {
        let bytes: [u8; 4] = ciphertext
            .try_into()
            .map_err(|_| TransactionError::Reverted("malformed ciphertext".into()))?;
        Ok(u32::from_le_bytes(bytes))
    }
}

#[async_trait]
impl ChainConnector for InMemoryChain {
    async fn submit_transaction(
        &self,
        from: Address,
        contract: Address,
        call: ContractCall,
    ) -> Result<TxHash, TransactionError> {
        self.submit_gate.pass().await;

        if let Some(err) = self.fail_next_submission.lock().take() {
            return Err(err);
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
        let measurements = Measurements::new(Self::decode(&height)?, Self::decode(&weight)?);

        let mut state = self.ledger.state.write();
        state.nonce += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"tx");
        hasher.update(from.as_bytes());
        hasher.update(contract.as_bytes());
        hasher.update(&state.nonce.to_le_bytes());
        let tx = TxHash(*hasher.finalize().as_bytes());

        state.pending.insert(
            tx,
            PendingTx {
                from,
                contract,
                category: BmiCategory::classify(&measurements),
            },
        );
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(tx)
    }

    async fn await_confirmation(&self, tx: TxHash) -> Result<TransactionReceipt, TransactionError> {
        if self.stall_confirmations.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.confirm_gate.pass().await;

        if let Some(err) = self.fail_next_confirmation.lock().take() {
            return Err(err);
        }

        let mut state = self.ledger.state.write();
        if let Some(receipt) = state.receipts.get(&tx) {
            return Ok(receipt.clone());
        }
        let pending = state
            .pending
            .remove(&tx)
            .ok_or_else(|| TransactionError::Rpc(format!("unknown transaction {}", tx)))?;

        state.block_number += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"handle");
        hasher.update(&tx.0);
        let handle = CiphertextHandle(*hasher.finalize().as_bytes());

        state.values.insert(
            handle,
            StoredValue {
                value: pending.category.index() as u64,
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
        Ok(receipt)
    }

    async fn read_contract_state(
        &self,
        contract: Address,
        call: ContractCall,
    ) -> Result<ContractValue, TransactionError> {
        match call {
            ContractCall::BmiCategoryOf { user } => Ok(self
                .ledger
                .category_handle(contract, user)
                .map(ContractValue::Handle)
                .unwrap_or(ContractValue::Empty)),
            ContractCall::ProtocolId => Ok(ContractValue::Uint(IN_MEMORY_PROTOCOL_ID)),
            other => Err(TransactionError::Rpc(format!(
                "{} is not a read call",
                other.method_name()
            ))),
        }
    }
}

/// Decryption oracle over the shared ledger
#[derive(Debug)]
pub struct InMemoryOracle {
    ledger: Arc<InMemoryLedger>,
    signature_requests: AtomicUsize,
    decrypt_calls: AtomicUsize,
    reject_next_signature: AtomicBool,
    fail_next_decrypt: Mutex<Option<DecryptionError>>,
    gate: Gate,
}

impl InMemoryOracle {
    pub fn new(ledger: Arc<InMemoryLedger>) -> Self {
        Self {
            ledger,
            signature_requests: AtomicUsize::new(0),
            decrypt_calls: AtomicUsize::new(0),
            reject_next_signature: AtomicBool::new(false),
            fail_next_decrypt: Mutex::new(None),
            gate: Gate::new(),
        }
    }

    pub fn signature_requests(&self) -> usize {
        self.signature_requests.load(Ordering::SeqCst)
    }

    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    /// The next signature prompt is declined
    pub fn reject_next_signature(&self) {
        self.reject_next_signature.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_decrypt(&self, err: DecryptionError) {
        *self.fail_next_decrypt.lock() = Some(err);
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }
}

#[async_trait]
impl DecryptionOracle for InMemoryOracle {
    async fn request_signature(
        &self,
        contract: Address,
        user: Address,
        validity: Duration,
    ) -> Result<DecryptionSignature, SignatureError> {
        self.signature_requests.fetch_add(1, Ordering::SeqCst);
        if self.reject_next_signature.swap(false, Ordering::SeqCst) {
            return Err(SignatureError::Rejected);
        }

        let issued_at = now();
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"signature");
        hasher.update(user.as_bytes());
        hasher.update(contract.as_bytes());
        hasher.update(&issued_at.to_le_bytes());

        Ok(DecryptionSignature {
            account: user,
            contract,
            signature: hasher.finalize().as_bytes().to_vec(),
            issued_at,
            expires_at: issued_at.saturating_add(validity.as_secs()),
        })
    }

    async fn decrypt(
        &self,
        handle: CiphertextHandle,
        signature: &DecryptionSignature,
    ) -> Result<u64, DecryptionError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;

        if let Some(err) = self.fail_next_decrypt.lock().take() {
            return Err(err);
        }

        let stored = self
            .ledger
            .state
            .read()
            .values
            .get(&handle)
            .copied()
            .ok_or(DecryptionError::HandleInvalid)?;

        if !signature.covers(stored.owner, stored.contract) || !signature.is_valid_at(now()) {
            return Err(DecryptionError::Unauthorized);
        }
        Ok(stored.value)
    }
}

/// A complete set of in-memory collaborators sharing one ledger
#[derive(Clone)]
pub struct InMemoryBackend {
    pub ledger: Arc<InMemoryLedger>,
    pub encryption: Arc<InMemoryEncryptionProvider>,
    pub chain: Arc<InMemoryChain>,
    pub oracle: Arc<InMemoryOracle>,
    pub signatures: Arc<InMemorySignatureCache>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        Self {
            encryption: Arc::new(InMemoryEncryptionProvider::new()),
            chain: Arc::new(InMemoryChain::new(ledger.clone())),
            oracle: Arc::new(InMemoryOracle::new(ledger.clone())),
            signatures: Arc::new(InMemorySignatureCache::new()),
            ledger,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            encryption: self.encryption.clone(),
            chain: self.chain.clone(),
            oracle: self.oracle.clone(),
            signatures: self.signatures.clone(),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
