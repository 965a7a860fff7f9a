//! Core domain types
//!
//! Addresses, chain identifiers, ciphertext handles and the BMI category
//! that the encrypted computation produces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// A 20-byte account or contract address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The all-zero address, used as the "not deployed" marker
    pub const ZERO: Address = Address([0u8; 20]);

    /// Create an address from raw bytes
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Whether this is the zero address
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Raw address bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Shortened form for logs, e.g. `0x5fbd…0aa3`
    pub fn short(&self) -> String {
        format!("0x{}…{}", hex::encode(&self.0[..2]), hex::encode(&self.0[18..]))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

/// Error parsing a hex address
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid address '{0}': expected 0x followed by 40 hex characters")]
pub struct AddressParseError(pub String);

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|_| AddressParseError(s.to_string()))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| AddressParseError(s.to_string()))?;
        Ok(Self(bytes))
    }
}

/// EVM chain identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct ChainId(pub u64);

impl ChainId {
    /// Local hardhat node
    pub const HARDHAT: ChainId = ChainId(31337);
    /// Sepolia testnet
    pub const SEPOLIA: ChainId = ChainId(11155111);
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Opaque on-chain reference to an encrypted value
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CiphertextHandle(pub [u8; 32]);

impl CiphertextHandle {
    /// Raw handle bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Shortened hex form for logs
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CiphertextHandle({})", self.short())
    }
}

/// Transaction hash returned on submission
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", hex::encode(&self.0[..8]))
    }
}

/// Plaintext body measurements submitted for encryption
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Measurements {
    /// Height in centimetres
    pub height_cm: u32,
    /// Weight in kilograms
    pub weight_kg: u32,
}

impl Measurements {
    pub fn new(height_cm: u32, weight_kg: u32) -> Self {
        Self { height_cm, weight_kg }
    }

    /// Check both values against the advisory input ranges
    pub fn within(
        &self,
        height: &RangeInclusive<u32>,
        weight: &RangeInclusive<u32>,
    ) -> bool {
        height.contains(&self.height_cm) && weight.contains(&self.weight_kg)
    }

    /// BMI in tenths (22.5 → 225), computed in the clear
    pub fn bmi_tenths(&self) -> u64 {
        if self.height_cm == 0 {
            return u64::MAX;
        }
        let h = self.height_cm as u64;
        (self.weight_kg as u64 * 100_000) / (h * h)
    }

    /// Inputs in submission order: height then weight
    pub fn as_inputs(&self) -> [u32; 2] {
        [self.height_cm, self.weight_kg]
    }
}

/// BMI category: the only value ever revealed to the user
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[repr(u8)]
pub enum BmiCategory {
    /// BMI below 18.5
    Underweight = 0,
    /// BMI from 18.5 up to 25
    Normal = 1,
    /// BMI of 25 or more
    Overweight = 2,
}

impl BmiCategory {
    /// Lower bound of the normal band, scaled by 10
    pub const NORMAL_LOWER_TENTHS: u32 = 185;
    /// Lower bound of the overweight band, scaled by 10
    pub const OVERWEIGHT_LOWER_TENTHS: u32 = 250;

    pub const ALL: [BmiCategory; 3] = [
        BmiCategory::Underweight,
        BmiCategory::Normal,
        BmiCategory::Overweight,
    ];

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            BmiCategory::Underweight => "Underweight",
            BmiCategory::Normal => "Normal",
            BmiCategory::Overweight => "Overweight",
        }
    }

    /// Numeric index as stored on chain
    pub fn index(&self) -> u8 {
        *self as u8
    }

    /// Classify measurements in the clear.
    ///
    /// Uses the same integer comparison the contract evaluates homomorphically:
    /// `weight * 100_000 < threshold_tenths * height²`.
    pub fn classify(measurements: &Measurements) -> Self {
        let h2 = measurements.height_cm as u64 * measurements.height_cm as u64;
        let scaled_weight = measurements.weight_kg as u64 * 100_000;

        if scaled_weight < Self::NORMAL_LOWER_TENTHS as u64 * h2 {
            BmiCategory::Underweight
        } else if scaled_weight < Self::OVERWEIGHT_LOWER_TENTHS as u64 * h2 {
            BmiCategory::Normal
        } else {
            BmiCategory::Overweight
        }
    }
}

impl fmt::Display for BmiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u64> for BmiCategory {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BmiCategory::Underweight),
            1 => Ok(BmiCategory::Normal),
            2 => Ok(BmiCategory::Overweight),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_and_display() {
        let addr: Address = "0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap();
        assert_eq!(addr.to_string(), "0x5fbdb2315678afecb367f032d93f642f64180aa3");
        assert!(!addr.is_zero());
        assert_eq!(addr.short(), "0x5fbd…0aa3");
    }

    #[test]
    fn test_address_parse_rejects_bad_input() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("not-an-address".parse::<Address>().is_err());
    }

    #[test]
    fn test_zero_address() {
        let zero: Address = "0x0000000000000000000000000000000000000000".parse().unwrap();
        assert!(zero.is_zero());
        assert_eq!(zero, Address::ZERO);
    }

    #[test]
    fn test_reference_measurement_is_normal() {
        let m = Measurements::new(170, 65);
        assert_eq!(m.bmi_tenths(), 224);
        assert_eq!(BmiCategory::classify(&m), BmiCategory::Normal);
        assert_eq!(BmiCategory::classify(&m).index(), 1);
    }

    #[test]
    fn test_category_boundaries() {
        // 18.5 * 2.0² = 74kg exactly → normal
        assert_eq!(BmiCategory::classify(&Measurements::new(200, 74)), BmiCategory::Normal);
        assert_eq!(BmiCategory::classify(&Measurements::new(200, 73)), BmiCategory::Underweight);
        // 25 * 2.0² = 100kg exactly → overweight
        assert_eq!(BmiCategory::classify(&Measurements::new(200, 100)), BmiCategory::Overweight);
        assert_eq!(BmiCategory::classify(&Measurements::new(200, 99)), BmiCategory::Normal);
    }

    #[test]
    fn test_category_names() {
        let names: Vec<_> = BmiCategory::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Underweight", "Normal", "Overweight"]);

        for (i, category) in BmiCategory::ALL.iter().enumerate() {
            assert_eq!(BmiCategory::try_from(i as u64), Ok(*category));
        }
        assert_eq!(BmiCategory::try_from(3), Err(3));
    }

    #[test]
    fn test_measurement_ranges() {
        let m = Measurements::new(170, 65);
        assert!(m.within(&(150..=250), &(30..=200)));
        assert!(!Measurements::new(149, 65).within(&(150..=250), &(30..=200)));
        assert!(!Measurements::new(170, 201).within(&(150..=250), &(30..=200)));
    }
}
