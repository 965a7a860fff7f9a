//! FHE-BMI Calculator
//!
//! Lifecycle controller for BMI categories computed on encrypted inputs:
//! - Client-side encryption of height and weight, bound to (contract, account)
//! - Submission and confirmation of the calculation transaction
//! - Decryption signatures cached per (account, contract)
//! - Cancellation by supersession through a generation counter
//! - Observable wallet context with automatic invalidation on switches
//!
//! ## Lifecycle
//!
//! ```text
//!   calculate()                                           decrypt()
//!  ┌──────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌───────┐   ┌────────────┐   ┌───────────┐
//!  │ Idle │──▶│ Encrypting │──▶│ Submitting │──▶│ Confirming │──▶│ Ready │──▶│ Decrypting │──▶│ Decrypted │
//!  └──────┘   └────────────┘   └────────────┘   └────────────┘   └───────┘   └────────────┘   └───────────┘
//!      ▲            │                │                │                            │
//!      │            └────────────────┴───────┬────────┴────────────────────────────┘
//!      │                                     ▼
//!      │   reset() / context switch     ┌───────┐
//!      └────────────────────────────────│ Error │
//!                                       └───────┘
//! ```
//!
//! The controller owns no cryptography. It drives an [`EncryptionProvider`],
//! a [`ChainConnector`] and a [`DecryptionOracle`]. The `testing` module,
//! behind the `testing` feature, has in-memory versions of all three.

pub mod context;
pub mod controller;
pub mod deployments;
pub mod errors;
pub mod phase;
pub mod provider;
pub mod signature;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use context::{ContextChange, WalletContext, WalletSnapshot};
pub use controller::{
    Collaborators, ControllerConfig, ControllerEvent, ControllerSummary,
    EncryptedCalculationController, HandleBinding, Request,
};
pub use deployments::{Deployment, DeploymentRegistry, CONTRACT_NAME};
pub use errors::{
    CalcResult, CalculatorError, DecryptionError, EncryptionError, ErrorKind, SignatureError,
    TransactionError,
};
pub use phase::{Phase, UiState};
pub use provider::{
    input_binding_digest, ChainConnector, ContractCall, ContractEvent, ContractValue,
    DecryptionOracle, EncryptedInputs, EncryptionProvider, TransactionReceipt,
};
pub use signature::{DecryptionSignature, InMemorySignatureCache, SignatureCache, SignatureKey};
pub use types::{
    Address, AddressParseError, BmiCategory, ChainId, CiphertextHandle, Measurements, TxHash,
};

/// Prelude for common imports
pub mod prelude {
    pub use crate::context::{WalletContext, WalletSnapshot};
    pub use crate::controller::{Collaborators, ControllerConfig, EncryptedCalculationController};
    pub use crate::deployments::{Deployment, DeploymentRegistry};
    pub use crate::errors::{CalcResult, CalculatorError, ErrorKind};
    pub use crate::phase::{Phase, UiState};
    pub use crate::types::{Address, BmiCategory, ChainId, CiphertextHandle, Measurements};
}
