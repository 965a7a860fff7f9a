//! FHE-BMI: Private BMI Categories on Encrypted Inputs
//!
//! This is the root crate that re-exports all FHE-BMI components for
//! integration testing and wires them into a ready-to-run session.
//!
//! ## Architecture Overview
//!
//! A user encrypts height and weight locally, submits the ciphertexts to the
//! calculator contract, which computes a BMI category homomorphically, and
//! finally decrypts only the category:
//!
//! - **Lifecycle control**: encrypt, submit, confirm, authorize, decrypt
//! - **Supersession**: stale async results never reach shared state
//! - **Context awareness**: account or chain switches invalidate results
//! - **Local FHE runtime**: TFHE-rs keys, circuit and owner-only decryption
//!
//! ## Crate Organization
//!
//! - `fhe-bmi-calculator`: Controller, domain types, collaborator traits
//! - `fhe-bmi-fhe`: Local FHE runtime implementing every collaborator
//! - `fhe-bmi-cli`: Command line front end

pub mod session;

// Re-export all crates for integration testing
pub use fhe_bmi_calculator as calculator;
pub use fhe_bmi_fhe as fhe;

/// FHE-BMI version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol defaults
pub mod config {
    use fhe_bmi_calculator::Address;

    /// First funded account of a local hardhat node
    pub const DEFAULT_LOCAL_ACCOUNT: Address = Address([
        0xf3, 0x9f, 0xd6, 0xe5, 0x1a, 0xad, 0x88, 0xf6, 0xf4, 0xce, 0x6a, 0xb8, 0x82, 0x72, 0x79,
        0xcf, 0xff, 0xb9, 0x22, 0x66,
    ]);

    /// Advisory input ranges
    pub mod ranges {
        /// Minimum height (cm)
        pub const MIN_HEIGHT_CM: u32 = 150;
        /// Maximum height (cm)
        pub const MAX_HEIGHT_CM: u32 = 250;
        /// Minimum weight (kg)
        pub const MIN_WEIGHT_KG: u32 = 30;
        /// Maximum weight (kg)
        pub const MAX_WEIGHT_KG: u32 = 200;
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use fhe_bmi_calculator::prelude::*;
    pub use fhe_bmi_fhe::{FheConfig, LocalFhevm};
    pub use crate::session::{BmiReport, BmiSession, SessionConfig, SessionError};
}
