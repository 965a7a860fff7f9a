//! BMI Session
//!
//! Wires a wallet context, a deployment registry and a set of collaborators
//! into a running controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          BmiSession                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────────┐   watch    ┌──────────────────────────┐   │
//! │  │ WalletContext │──────────▶│ context watcher (task)   │   │
//! │  └───────┬───────┘            └────────────┬─────────────┘   │
//! │          │                                 │                 │
//! │          │        ┌────────────────────────▼──────────┐      │
//! │          └───────▶│  EncryptedCalculationController  │      │
//! │                   └────────────────┬─────────────────┘      │
//! │                                    │                        │
//! │            ┌───────────────────────▼─────────────────┐      │
//! │            │ Collaborators (LocalFhevm / in-memory)  │      │
//! │            └─────────────────────────────────────────┘      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use fhe_bmi_calculator::{
    Address, BmiCategory, CalculatorError, ChainId, CiphertextHandle, Collaborators,
    ControllerConfig, Deployment, DeploymentRegistry, EncryptedCalculationController,
    InMemorySignatureCache, Measurements, WalletContext,
};
use fhe_bmi_fhe::{FheConfig, FheError, LocalFhevm};

/// Errors during a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Calculator(#[from] CalculatorError),
    #[error("FHE runtime error: {0}")]
    Fhe(#[from] FheError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Session configuration
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Controller tuning
    pub controller: ControllerConfig,
    /// Local runtime parameters
    pub fhe: FheConfig,
    /// Account the wallet starts connected with
    pub account: Address,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::local(),
            fhe: FheConfig::default(),
            account: crate::config::DEFAULT_LOCAL_ACCOUNT,
        }
    }
}

impl SessionConfig {
    pub fn with_account(mut self, account: Address) -> Self {
        self.account = account;
        self
    }

    pub fn with_controller(mut self, controller: ControllerConfig) -> Self {
        self.controller = controller;
        self
    }
}

/// Outcome of a complete calculate + decrypt run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BmiReport {
    pub request_id: u64,
    pub measurements: Measurements,
    pub handle: CiphertextHandle,
    pub category: BmiCategory,
    pub elapsed: Duration,
}

/// A controller with its wallet context and context watcher
pub struct BmiSession {
    controller: Arc<EncryptedCalculationController>,
    context: WalletContext,
    watcher: JoinHandle<()>,
}

impl BmiSession {
    /// Build a session over arbitrary collaborators. Must be called inside a
    /// tokio runtime.
    pub fn new(
        config: ControllerConfig,
        context: WalletContext,
        deployments: DeploymentRegistry,
        collaborators: Collaborators,
    ) -> Self {
        let controller = Arc::new(EncryptedCalculationController::new(
            config,
            context.clone(),
            deployments,
            collaborators,
        ));
        let watcher = controller.spawn_context_watcher();

        Self {
            controller,
            context,
            watcher,
        }
    }

    /// Start a local FHE runtime and connect `config.account` to it
    pub async fn start_local(config: SessionConfig) -> SessionResult<Self> {
        let fhevm = LocalFhevm::start(config.fhe.clone()).await?;
        Ok(Self::with_runtime(config, fhevm))
    }

    /// Session against an already running local runtime
    pub fn with_runtime(config: SessionConfig, fhevm: Arc<LocalFhevm>) -> Self {
        let deployments = DeploymentRegistry::with_known_networks().with(Deployment::new(
            fhevm.chain_id(),
            chain_name(fhevm.chain_id()),
            fhevm.contract_address(),
        ));
        let context = WalletContext::connected(config.account, fhevm.chain_id());
        let collaborators = fhevm.collaborators(Arc::new(InMemorySignatureCache::new()));

        Self::new(config.controller, context, deployments, collaborators)
    }

    pub fn controller(&self) -> &Arc<EncryptedCalculationController> {
        &self.controller
    }

    pub fn context(&self) -> &WalletContext {
        &self.context
    }

    /// Calculate and decrypt in one go
    pub async fn run(&self, height_cm: u32, weight_kg: u32) -> SessionResult<BmiReport> {
        let started = Instant::now();

        let handle = self.controller.calculate(height_cm, weight_kg).await?;
        let request_id = self.controller.generation();
        let category = self.controller.decrypt().await?;

        let report = BmiReport {
            request_id,
            measurements: Measurements::new(height_cm, weight_kg),
            handle,
            category,
            elapsed: started.elapsed(),
        };
        info!(
            "Request {} finished in {:?}: {}",
            report.request_id, report.elapsed, report.category
        );
        Ok(report)
    }

    /// Stop the context watcher
    pub fn shutdown(self) {
        self.watcher.abort();
    }
}

impl Drop for BmiSession {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Conventional network name for a chain id
pub fn chain_name(chain_id: ChainId) -> &'static str {
    match chain_id {
        ChainId::HARDHAT => "hardhat",
        ChainId::SEPOLIA => "sepolia",
        _ => "unknown",
    }
}
