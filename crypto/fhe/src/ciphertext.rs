//! Encrypted 32-bit values
//!
//! Heights, weights and categories all travel as [`EncryptedU32`]. On the
//! wire they are bincode-serialized TFHE-rs ciphertexts.

use crate::keys::KeySet;
use crate::{FheError, FheResult};
use tfhe::prelude::*;
use tfhe::FheUint32;

/// Encrypted u32
#[derive(Clone)]
pub struct EncryptedU32 {
    inner: FheUint32,
}

impl EncryptedU32 {
    /// Encrypt with the client key
    pub fn encrypt(value: u32, keys: &KeySet) -> FheResult<Self> {
        let inner = FheUint32::try_encrypt(value, keys.client())
            .map_err(|e| FheError::EncryptionFailed(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Public constant, encrypted trivially so it can be mixed with ciphertexts
    pub fn trivial(value: u32) -> Self {
        Self {
            inner: FheUint32::encrypt_trivial(value),
        }
    }

    /// Decrypt with the client key
    pub fn decrypt(&self, keys: &KeySet) -> u32 {
        self.inner.decrypt(keys.client())
    }

    pub fn from_tfhe(inner: FheUint32) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &FheUint32 {
        &self.inner
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> FheResult<Vec<u8>> {
        bincode::serialize(&self.inner).map_err(|e| FheError::SerializationError(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> FheResult<Self> {
        if bytes.is_empty() {
            return Err(FheError::InvalidCiphertext("empty ciphertext".into()));
        }
        let inner: FheUint32 = bincode::deserialize(bytes)
            .map_err(|e| FheError::InvalidCiphertext(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl std::fmt::Debug for EncryptedU32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedU32").finish_non_exhaustive()
    }
}
