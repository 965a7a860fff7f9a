//! Homomorphic BMI category circuit
//!
//! Integer form of `weight / height_m² < threshold`, with heights in cm and
//! thresholds in tenths:
//!
//! ```text
//! weight · 100_000 < 185 · height²   → Underweight (0)
//! weight · 100_000 < 250 · height²   → Normal      (1)
//! otherwise                          → Overweight  (2)
//! ```
//!
//! All arithmetic is mod 2^32. For heights up to 250cm and weights up to
//! 200kg every intermediate value stays below 2^25.

use crate::ciphertext::EncryptedU32;
use fhe_bmi_calculator::BmiCategory;
use tfhe::prelude::*;

/// Scale applied to the weight so both sides of the comparison are integers
pub const WEIGHT_SCALE: u32 = 100_000;

/// Evaluate the category circuit. The server key must be installed on the
/// calling thread.
pub fn evaluate_category(height: &EncryptedU32, weight: &EncryptedU32) -> EncryptedU32 {
    let height_sq = height.inner() * height.inner();
    let scaled_weight = weight.inner() * WEIGHT_SCALE;

    let normal_floor = &height_sq * BmiCategory::NORMAL_LOWER_TENTHS;
    let overweight_floor = &height_sq * BmiCategory::OVERWEIGHT_LOWER_TENTHS;

    let is_underweight = scaled_weight.lt(&normal_floor);
    let is_normal = scaled_weight.lt(&overweight_floor);

    let underweight = EncryptedU32::trivial(BmiCategory::Underweight.index() as u32);
    let normal = EncryptedU32::trivial(BmiCategory::Normal.index() as u32);
    let overweight = EncryptedU32::trivial(BmiCategory::Overweight.index() as u32);

    let upper = is_normal.if_then_else(normal.inner(), overweight.inner());
    EncryptedU32::from_tfhe(is_underweight.if_then_else(underweight.inner(), &upper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeySet;
    use crate::FheConfig;

    #[test]
    fn test_circuit_matches_plaintext_rule() {
        let keys = KeySet::generate(&FheConfig::default()).unwrap();
        keys.install();

        for (height, weight, expected) in [
            (170, 65, BmiCategory::Normal),
            (180, 50, BmiCategory::Underweight),
            (160, 90, BmiCategory::Overweight),
        ] {
            let h = EncryptedU32::encrypt(height, &keys).unwrap();
            let w = EncryptedU32::encrypt(weight, &keys).unwrap();
            let category = evaluate_category(&h, &w).decrypt(&keys);
            assert_eq!(category, expected.index() as u32, "{}cm {}kg", height, weight);
        }
    }
}
