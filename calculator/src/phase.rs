//! Lifecycle phases and the derived UI state

use crate::errors::ErrorKind;
use crate::types::{Address, BmiCategory, ChainId, CiphertextHandle};
use serde::{Deserialize, Serialize};

/// Phase of the encrypted calculation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Nothing in progress
    Idle,
    /// Inputs are being encrypted client side
    Encrypting,
    /// Transaction submitted, waiting for inclusion
    Submitting,
    /// Confirmed, reading the result handle
    Confirming,
    /// Handle available, decryption possible
    Ready,
    /// Signature prompt or oracle call in progress
    Decrypting,
    /// Category decrypted
    Decrypted,
    /// Last attempt failed
    Error,
}

impl Phase {
    /// Phases with an outstanding collaborator call
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Phase::Encrypting | Phase::Submitting | Phase::Confirming | Phase::Decrypting
        )
    }

    /// Phases belonging to the calculation half of the lifecycle
    pub fn is_calculating(&self) -> bool {
        matches!(self, Phase::Encrypting | Phase::Submitting | Phase::Confirming)
    }

    /// Position in the forward order; `Error` has none
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            Phase::Idle => Some(0),
            Phase::Encrypting => Some(1),
            Phase::Submitting => Some(2),
            Phase::Confirming => Some(3),
            Phase::Ready => Some(4),
            Phase::Decrypting => Some(5),
            Phase::Decrypted => Some(6),
            Phase::Error => None,
        }
    }

    /// A request may move forward or fail, never step back
    pub fn can_advance_to(&self, next: Phase) -> bool {
        match (self.ordinal(), next.ordinal()) {
            (_, None) => true,
            (Some(current), Some(next)) => next > current,
            // Retrying decryption from a failed attempt
            (None, Some(_)) => next == Phase::Decrypting,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Encrypting => "encrypting",
            Phase::Submitting => "submitting",
            Phase::Confirming => "confirming",
            Phase::Ready => "ready",
            Phase::Decrypting => "decrypting",
            Phase::Decrypted => "decrypted",
            Phase::Error => "error",
        };
        f.write_str(name)
    }
}

/// Everything a front end needs to render the calculator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiState {
    pub phase: Phase,
    pub is_calculating: bool,
    pub is_decrypting: bool,
    pub is_decrypted: bool,
    pub can_calculate_bmi: bool,
    pub can_decrypt_category: bool,
    pub message: String,
    pub error: Option<ErrorKind>,
    pub category: Option<BmiCategory>,
    pub handle: Option<CiphertextHandle>,
    pub chain_id: Option<ChainId>,
    pub contract_address: Option<Address>,
    pub is_deployed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_phases() {
        assert!(Phase::Encrypting.is_in_flight());
        assert!(Phase::Decrypting.is_in_flight());
        assert!(!Phase::Ready.is_in_flight());
        assert!(!Phase::Error.is_in_flight());
        assert!(Phase::Confirming.is_calculating());
        assert!(!Phase::Decrypting.is_calculating());
    }

    #[test]
    fn test_forward_only() {
        assert!(Phase::Idle.can_advance_to(Phase::Encrypting));
        assert!(Phase::Encrypting.can_advance_to(Phase::Submitting));
        assert!(Phase::Ready.can_advance_to(Phase::Decrypting));
        assert!(Phase::Submitting.can_advance_to(Phase::Error));
        assert!(Phase::Error.can_advance_to(Phase::Decrypting));

        assert!(!Phase::Submitting.can_advance_to(Phase::Encrypting));
        assert!(!Phase::Decrypted.can_advance_to(Phase::Ready));
        assert!(!Phase::Error.can_advance_to(Phase::Submitting));
    }

    #[test]
    fn test_display() {
        assert_eq!(Phase::Ready.to_string(), "ready");
        assert_eq!(Phase::Error.to_string(), "error");
    }
}
