//! Encrypted Calculation Controller
//!
//! Drives one BMI request through its lifecycle:
//! 1. Encrypt - height and weight, bound to (contract, account)
//! 2. Submit - `calculateBMICategory` with ciphertexts and proof
//! 3. Confirm - wait for inclusion, then read the result handle
//! 4. Authorize - reuse or request a decryption signature
//! 5. Decrypt - resolve the handle to a category
//!
//! Every await is followed by a generation check. `reset`, a newer
//! `calculate`, or an account/chain switch bumps the generation, and any
//! work that resumes under an older generation returns
//! [`CalculatorError::Superseded`] without touching state.

use crate::context::{ContextChange, WalletContext, WalletSnapshot};
use crate::deployments::DeploymentRegistry;
use crate::errors::{CalcResult, CalculatorError, DecryptionError, ErrorKind, TransactionError};
use crate::phase::{Phase, UiState};
use crate::provider::{
    ChainConnector, ContractCall, ContractValue, DecryptionOracle, EncryptionProvider,
};
use crate::signature::{SignatureCache, SignatureKey};
use crate::types::{Address, BmiCategory, ChainId, CiphertextHandle, Measurements};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Controller configuration
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Maximum wait for transaction inclusion
    pub confirmation_timeout: Duration,
    /// Lifetime requested for new decryption signatures
    pub signature_validity: Duration,
    /// Accepted height range (cm)
    pub height_range: RangeInclusive<u32>,
    /// Accepted weight range (kg)
    pub weight_range: RangeInclusive<u32>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(300), // 5 minutes
            signature_validity: Duration::from_secs(365 * 24 * 60 * 60),
            height_range: 150..=250,
            weight_range: 30..=200,
        }
    }
}

impl ControllerConfig {
    /// Local hardhat node: blocks are instant
    pub fn local() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Public testnet: slow blocks, relayer round trips
    pub fn testnet() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(600),
            ..Default::default()
        }
    }
}

/// The collaborators a controller drives
#[derive(Clone)]
pub struct Collaborators {
    pub encryption: Arc<dyn EncryptionProvider>,
    pub chain: Arc<dyn ChainConnector>,
    pub oracle: Arc<dyn DecryptionOracle>,
    pub signatures: Arc<dyn SignatureCache>,
}

/// The in-flight unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Generation that created this request
    pub request_id: u64,
    pub measurements: Measurements,
    pub phase: Phase,
    pub contract: Address,
    pub chain_id: ChainId,
    pub account: Address,
    /// Wallet context epoch the request was started under
    pub context_epoch: u64,
}

/// A handle together with the context that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleBinding {
    pub handle: CiphertextHandle,
    pub account: Address,
    pub chain_id: ChainId,
    pub contract: Address,
    pub context_epoch: u64,
}

impl HandleBinding {
    fn is_valid_for(&self, snapshot: &WalletSnapshot, deployments: &DeploymentRegistry) -> bool {
        snapshot.epoch == self.context_epoch
            && snapshot.matches(self.account, self.chain_id)
            && deployments.contract_address(self.chain_id) == Some(self.contract)
    }
}

/// Notifications for observers of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Phase changed under `generation`
    PhaseChanged { generation: u64, phase: Phase },
    /// Stale work was discarded
    Superseded { stale: u64, current: u64 },
    /// Wallet context switched; bound results were dropped
    ContextInvalidated { change: ContextChange },
}

#[derive(Debug)]
struct ControllerState {
    phase: Phase,
    generation: u64,
    request: Option<Request>,
    handle: Option<HandleBinding>,
    category: Option<BmiCategory>,
    error: Option<ErrorKind>,
    message: String,
    /// Context the current request or handle is bound to
    bound_snapshot: Option<WalletSnapshot>,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            generation: 0,
            request: None,
            handle: None,
            category: None,
            error: None,
            message: String::new(),
            bound_snapshot: None,
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        if let Some(request) = self.request.as_mut() {
            request.phase = phase;
        }
    }

    fn clear(&mut self) {
        self.request = None;
        self.handle = None;
        self.category = None;
        self.error = None;
        self.bound_snapshot = None;
    }
}

/// Coordinates encrypted BMI calculation and decryption
pub struct EncryptedCalculationController {
    config: ControllerConfig,
    context: WalletContext,
    deployments: DeploymentRegistry,
    collaborators: Collaborators,
    state: RwLock<ControllerState>,
    events: broadcast::Sender<ControllerEvent>,
}

impl EncryptedCalculationController {
    /// Create a controller observing `context`
    pub fn new(
        config: ControllerConfig,
        context: WalletContext,
        deployments: DeploymentRegistry,
        collaborators: Collaborators,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            context,
            deployments,
            collaborators,
            state: RwLock::new(ControllerState::new()),
            events,
        }
    }

    /// Spawn a task reacting to account and chain switches.
    ///
    /// The task holds only a weak reference and ends once the controller is
    /// dropped and the next notification arrives.
    pub fn spawn_context_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.context.subscribe();
        let controller: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = *rx.borrow_and_update();
                match controller.upgrade() {
                    Some(controller) => controller.handle_context_change(&snapshot),
                    None => break,
                }
            }
        })
    }

    /// Subscribe to controller events
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn context(&self) -> &WalletContext {
        &self.context
    }

    pub fn deployments(&self) -> &DeploymentRegistry {
        &self.deployments
    }

    pub fn phase(&self) -> Phase {
        self.state.read().phase
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn current_request(&self) -> Option<Request> {
        self.state.read().request.clone()
    }

    pub fn handle(&self) -> Option<CiphertextHandle> {
        self.state.read().handle.map(|b| b.handle)
    }

    pub fn handle_binding(&self) -> Option<HandleBinding> {
        self.state.read().handle
    }

    pub fn category(&self) -> Option<BmiCategory> {
        self.state.read().category
    }

    pub fn message(&self) -> String {
        self.state.read().message.clone()
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.state.read().error
    }

    /// Contract address on the currently selected chain
    pub fn contract_address(&self) -> Option<Address> {
        self.context
            .snapshot()
            .chain_id
            .and_then(|chain_id| self.deployments.contract_address(chain_id))
    }

    /// Derive the UI flags from current state
    pub fn ui_state(&self) -> UiState {
        let snapshot = self.context.snapshot();
        let contract_address = snapshot
            .chain_id
            .and_then(|chain_id| self.deployments.contract_address(chain_id));
        let state = self.state.read();
        let in_flight = state.phase.is_in_flight();
        let is_decrypted = state.phase == Phase::Decrypted && state.category.is_some();

        UiState {
            phase: state.phase,
            is_calculating: state.phase.is_calculating(),
            is_decrypting: state.phase == Phase::Decrypting,
            is_decrypted,
            can_calculate_bmi: snapshot.is_connected() && contract_address.is_some() && !in_flight,
            can_decrypt_category: state.handle.is_some() && !in_flight && !is_decrypted,
            message: state.message.clone(),
            error: state.error,
            category: state.category,
            handle: state.handle.map(|b| b.handle),
            chain_id: snapshot.chain_id,
            contract_address,
            is_deployed: contract_address.is_some(),
        }
    }

    /// Encrypt `height_cm` and `weight_kg`, submit them and fetch the
    /// resulting category handle
    pub async fn calculate(&self, height_cm: u32, weight_kg: u32) -> CalcResult<CiphertextHandle> {
        let request = self.begin_request(Measurements::new(height_cm, weight_kg))?;
        info!(
            "Request {} started for {} on chain {}",
            request.request_id,
            request.account.short(),
            request.chain_id
        );

        // Step 1: encryption, potentially slow
        let encrypted = match self
            .collaborators
            .encryption
            .encrypt(request.contract, request.account, &request.measurements.as_inputs())
            .await
        {
            Ok(encrypted) => encrypted,
            Err(e) => return Err(self.fail_request(&request, e.into())),
        };
        debug!("Request {} encrypted: {:?}", request.request_id, encrypted);

        let call = match ContractCall::calculate(encrypted) {
            Ok(call) => call,
            Err(e) => return Err(self.fail_request(&request, e.into())),
        };

        // Step 2: submission
        self.advance(&request, Phase::Submitting, "Submitting encrypted data to the contract...")?;
        let tx = match self
            .collaborators
            .chain
            .submit_transaction(request.account, request.contract, call)
            .await
        {
            Ok(tx) => tx,
            Err(e) => return Err(self.fail_request(&request, e.into())),
        };
        self.ensure_current(&request)?;
        self.set_message(&request, format!("Waiting for transaction {}...", tx));

        // Step 3: confirmation and handle read
        let confirmation = tokio::time::timeout(
            self.config.confirmation_timeout,
            self.collaborators.chain.await_confirmation(tx),
        )
        .await;
        let receipt = match confirmation {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => return Err(self.fail_request(&request, e.into())),
            Err(_) => {
                let secs = self.config.confirmation_timeout.as_secs();
                return Err(self.fail_request(&request, TransactionError::Timeout(secs).into()));
            }
        };
        self.advance(&request, Phase::Confirming, "Transaction confirmed, fetching encrypted result...")?;

        let value = match self
            .collaborators
            .chain
            .read_contract_state(request.contract, ContractCall::BmiCategoryOf { user: request.account })
            .await
        {
            Ok(value) => value,
            Err(e) => return Err(self.fail_request(&request, e.into())),
        };
        let handle = match value {
            ContractValue::Handle(handle) => handle,
            _ => match receipt.result_handle_for(request.account) {
                Some(handle) => handle,
                None => {
                    let err = TransactionError::Reverted("no BMI category stored for sender".into());
                    return Err(self.fail_request(&request, err.into()));
                }
            },
        };

        // Step 4: commit
        self.commit_handle(&request, handle)?;
        info!("Request {} produced handle {}", request.request_id, handle.short());
        Ok(handle)
    }

    /// Decrypt the current handle into a category
    pub async fn decrypt(&self) -> CalcResult<BmiCategory> {
        let (binding, generation, previous_phase) = self.begin_decryption()?;
        let (binding, generation, previous_phase) = match previous_phase {
            // Already decrypted under the same binding
            None => return self.category().ok_or(CalculatorError::NoHandle),
            Some(previous) => (binding, generation, previous),
        };

        let key = SignatureKey::new(binding.account, binding.contract);
        let signature = match self.collaborators.signatures.load_valid(&key, now()) {
            Some(signature) => {
                debug!("Reusing decryption signature for {}", binding.account.short());
                signature
            }
            None => {
                self.set_generation_message(generation, "Waiting for decryption signature...");
                match self
                    .collaborators
                    .oracle
                    .request_signature(binding.contract, binding.account, self.config.signature_validity)
                    .await
                {
                    Ok(signature) => {
                        self.collaborators.signatures.put(signature.clone());
                        signature
                    }
                    Err(e) => {
                        return Err(self.restore_after_signature(generation, previous_phase, e.into()))
                    }
                }
            }
        };
        self.ensure_generation(generation)?;

        let plaintext = match self.collaborators.oracle.decrypt(binding.handle, &signature).await {
            Ok(plaintext) => plaintext,
            Err(e) => return Err(self.fail_decryption(generation, e.into())),
        };
        let category = match BmiCategory::try_from(plaintext) {
            Ok(category) => category,
            Err(value) => {
                let err = DecryptionError::InvalidPlaintext(value);
                return Err(self.fail_decryption(generation, err.into()));
            }
        };

        self.commit_category(generation, &binding, category)?;
        info!("Handle {} decrypted to {}", binding.handle.short(), category);
        Ok(category)
    }

    /// Drop all state and invalidate in-flight work. Always succeeds.
    pub fn reset(&self) {
        let generation = {
            let mut state = self.state.write();
            state.generation += 1;
            state.clear();
            state.set_phase(Phase::Idle);
            state.message.clear();
            state.generation
        };
        debug!("Controller reset to generation {}", generation);
        self.emit(ControllerEvent::PhaseChanged {
            generation,
            phase: Phase::Idle,
        });
    }

    /// React to an account or chain switch
    pub fn handle_context_change(&self, snapshot: &WalletSnapshot) {
        let change = {
            let mut state = self.state.write();
            let bound = match state.bound_snapshot {
                // Older notifications than the bound context are already accounted for
                Some(bound) if snapshot.is_newer_than(&bound) => bound,
                _ => return,
            };
            invalidate_for_context(&mut state);
            ContextChange::between(&bound, snapshot)
        };
        warn!("Wallet context changed ({:?}), discarding bound results", change);
        self.emit(ControllerEvent::ContextInvalidated { change });
    }

    fn begin_request(&self, measurements: Measurements) -> CalcResult<Request> {
        let snapshot = self.context.snapshot();
        let mut state = self.state.write();

        if state.phase.is_in_flight() {
            return Err(CalculatorError::Busy);
        }

        let precondition = match (snapshot.account, snapshot.chain_id) {
            (Some(account), Some(chain_id)) => match self.deployments.contract_address(chain_id) {
                Some(contract) => {
                    if measurements.within(&self.config.height_range, &self.config.weight_range) {
                        Ok((account, chain_id, contract))
                    } else {
                        Err(CalculatorError::InvalidInput(format!(
                            "height must be {}-{}cm and weight {}-{}kg",
                            self.config.height_range.start(),
                            self.config.height_range.end(),
                            self.config.weight_range.start(),
                            self.config.weight_range.end(),
                        )))
                    }
                }
                None => Err(CalculatorError::NotDeployed(chain_id)),
            },
            _ => Err(CalculatorError::WalletNotConnected),
        };
        let (account, chain_id, contract) = match precondition {
            Ok(binding) => binding,
            Err(e) => {
                state.message = e.to_string();
                return Err(e);
            }
        };

        state.generation += 1;
        state.clear();
        let request = Request {
            request_id: state.generation,
            measurements,
            phase: Phase::Encrypting,
            contract,
            chain_id,
            account,
            context_epoch: snapshot.epoch,
        };
        state.request = Some(request.clone());
        state.bound_snapshot = Some(snapshot);
        state.set_phase(Phase::Encrypting);
        state.message = "Encrypting height and weight...".to_string();
        drop(state);

        self.emit(ControllerEvent::PhaseChanged {
            generation: request.request_id,
            phase: Phase::Encrypting,
        });
        Ok(request)
    }

    /// Fail with `Superseded` when the request is stale, or with
    /// `ContextChanged` when the wallet moved away from it
    fn ensure_current(&self, request: &Request) -> CalcResult<()> {
        let mut state = self.state.write();
        if state.generation != request.request_id {
            let current = state.generation;
            drop(state);
            return Err(self.superseded(request.request_id, current));
        }

        let snapshot = self.context.snapshot();
        if snapshot.epoch != request.context_epoch
            || !snapshot.matches(request.account, request.chain_id)
        {
            let bound = state.bound_snapshot.unwrap_or_default();
            invalidate_for_context(&mut state);
            drop(state);
            warn!("Request {} abandoned: wallet context changed", request.request_id);
            self.emit(ControllerEvent::ContextInvalidated {
                change: ContextChange::between(&bound, &snapshot),
            });
            return Err(CalculatorError::ContextChanged);
        }
        Ok(())
    }

    fn ensure_generation(&self, generation: u64) -> CalcResult<()> {
        let current = self.state.read().generation;
        if current != generation {
            return Err(self.superseded(generation, current));
        }
        Ok(())
    }

    fn advance(&self, request: &Request, phase: Phase, message: &str) -> CalcResult<()> {
        self.ensure_current(request)?;
        {
            let mut state = self.state.write();
            // Re-checked under the same lock that applies the transition
            if state.generation != request.request_id {
                let current = state.generation;
                drop(state);
                return Err(self.superseded(request.request_id, current));
            }
            debug_assert!(state.phase.can_advance_to(phase));
            state.set_phase(phase);
            state.message = message.to_string();
        }
        debug!("Request {} → {}", request.request_id, phase);
        self.emit(ControllerEvent::PhaseChanged {
            generation: request.request_id,
            phase,
        });
        Ok(())
    }

    fn set_message(&self, request: &Request, message: String) {
        self.set_generation_message(request.request_id, &message);
    }

    fn set_generation_message(&self, generation: u64, message: &str) {
        let mut state = self.state.write();
        if state.generation == generation {
            state.message = message.to_string();
        }
    }

    /// Record a calculation failure, unless the request is already stale
    fn fail_request(&self, request: &Request, err: CalculatorError) -> CalculatorError {
        {
            let mut state = self.state.write();
            if state.generation != request.request_id {
                let current = state.generation;
                drop(state);
                return self.superseded(request.request_id, current);
            }
            state.request = None;
            state.bound_snapshot = None;
            state.set_phase(Phase::Error);
            state.error = Some(err.kind());
            state.message = err.to_string();
        }
        warn!("Request {} failed: {}", request.request_id, err);
        self.emit(ControllerEvent::PhaseChanged {
            generation: request.request_id,
            phase: Phase::Error,
        });
        err
    }

    fn commit_handle(&self, request: &Request, handle: CiphertextHandle) -> CalcResult<()> {
        self.ensure_current(request)?;
        {
            let mut state = self.state.write();
            if state.generation != request.request_id {
                let current = state.generation;
                drop(state);
                return Err(self.superseded(request.request_id, current));
            }
            state.handle = Some(HandleBinding {
                handle,
                account: request.account,
                chain_id: request.chain_id,
                contract: request.contract,
                context_epoch: request.context_epoch,
            });
            state.category = None;
            state.error = None;
            state.set_phase(Phase::Ready);
            state.message = "BMI calculation completed, decrypt to view your category".to_string();
        }
        self.emit(ControllerEvent::PhaseChanged {
            generation: request.request_id,
            phase: Phase::Ready,
        });
        Ok(())
    }

    /// Returns `None` as the previous phase when a cached category can be reused
    fn begin_decryption(&self) -> CalcResult<(HandleBinding, u64, Option<Phase>)> {
        let snapshot = self.context.snapshot();
        let mut state = self.state.write();

        let binding = match state.handle {
            Some(binding) => binding,
            None => {
                let err = CalculatorError::NoHandle;
                state.message = err.to_string();
                return Err(err);
            }
        };
        if state.phase.is_in_flight() {
            return Err(CalculatorError::Busy);
        }
        if !binding.is_valid_for(&snapshot, &self.deployments) {
            invalidate_for_context(&mut state);
            state.message = CalculatorError::ContextChanged.to_string();
            return Err(CalculatorError::ContextChanged);
        }

        if state.phase == Phase::Decrypted && state.category.is_some() {
            return Ok((binding, state.generation, None));
        }

        let previous = state.phase;
        state.set_phase(Phase::Decrypting);
        state.message = "Decrypting BMI category...".to_string();
        let generation = state.generation;
        drop(state);

        self.emit(ControllerEvent::PhaseChanged {
            generation,
            phase: Phase::Decrypting,
        });
        Ok((binding, generation, Some(previous)))
    }

    /// A rejected prompt leaves the phase as it was before `decrypt`
    fn restore_after_signature(
        &self,
        generation: u64,
        previous: Phase,
        err: CalculatorError,
    ) -> CalculatorError {
        {
            let mut state = self.state.write();
            if state.generation != generation {
                let current = state.generation;
                drop(state);
                return self.superseded(generation, current);
            }
            state.set_phase(previous);
            state.error = Some(err.kind());
            state.message = err.to_string();
        }
        warn!("Decryption signature not obtained: {}", err);
        self.emit(ControllerEvent::PhaseChanged {
            generation,
            phase: previous,
        });
        err
    }

    /// Decryption failures keep the handle for a retry
    fn fail_decryption(&self, generation: u64, err: CalculatorError) -> CalculatorError {
        {
            let mut state = self.state.write();
            if state.generation != generation {
                let current = state.generation;
                drop(state);
                return self.superseded(generation, current);
            }
            state.set_phase(Phase::Error);
            state.error = Some(err.kind());
            state.message = err.to_string();
        }
        warn!("Decryption failed: {}", err);
        self.emit(ControllerEvent::PhaseChanged {
            generation,
            phase: Phase::Error,
        });
        err
    }

    fn commit_category(
        &self,
        generation: u64,
        binding: &HandleBinding,
        category: BmiCategory,
    ) -> CalcResult<()> {
        let snapshot = self.context.snapshot();
        {
            let mut state = self.state.write();
            if state.generation != generation {
                let current = state.generation;
                drop(state);
                return Err(self.superseded(generation, current));
            }
            if !binding.is_valid_for(&snapshot, &self.deployments) {
                invalidate_for_context(&mut state);
                return Err(CalculatorError::ContextChanged);
            }
            state.category = Some(category);
            state.error = None;
            state.set_phase(Phase::Decrypted);
            state.message = format!("BMI category: {}", category);
        }
        self.emit(ControllerEvent::PhaseChanged {
            generation,
            phase: Phase::Decrypted,
        });
        Ok(())
    }

    fn superseded(&self, stale: u64, current: u64) -> CalculatorError {
        debug!("Discarding stale work from generation {} (current {})", stale, current);
        self.emit(ControllerEvent::Superseded { stale, current });
        CalculatorError::Superseded { stale, current }
    }

    fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Drop everything bound to the previous wallet context
fn invalidate_for_context(state: &mut ControllerState) {
    let was_in_flight = state.phase.is_in_flight();
    state.generation += 1;
    state.clear();
    if was_in_flight {
        state.set_phase(Phase::Error);
        state.error = Some(ErrorKind::ContextChanged);
        state.message = CalculatorError::ContextChanged.to_string();
    } else {
        state.set_phase(Phase::Idle);
        state.message = "Wallet account or network changed, please recalculate".to_string();
    }
}

/// Current unix time in seconds
fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Serializable summary of the controller, for logs and status output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSummary {
    pub phase: Phase,
    pub generation: u64,
    pub handle: Option<String>,
    pub category: Option<BmiCategory>,
    pub message: String,
}

impl EncryptedCalculationController {
    pub fn summary(&self) -> ControllerSummary {
        let state = self.state.read();
        ControllerSummary {
            phase: state.phase,
            generation: state.generation,
            handle: state.handle.map(|b| b.handle.to_string()),
            category: state.category,
            message: state.message.clone(),
        }
    }
}
