//! Decryption signatures and their cache
//!
//! A decryption signature is the user's consent to decrypt handles of one
//! contract. Prompting for it is intrusive, so signatures are cached per
//! (account, contract) and reused until they expire.

use crate::types::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Authorization to decrypt handles of a contract on behalf of an account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionSignature {
    /// Signing account
    pub account: Address,
    /// Contract whose handles may be decrypted
    pub contract: Address,
    /// Signature over the typed authorization message
    pub signature: Vec<u8>,
    /// Issue time (unix seconds)
    pub issued_at: u64,
    /// Expiry (unix seconds)
    pub expires_at: u64,
}

impl DecryptionSignature {
    /// Cache key for this signature
    pub fn key(&self) -> SignatureKey {
        SignatureKey::new(self.account, self.contract)
    }

    /// Valid strictly before `expires_at`
    pub fn is_valid_at(&self, now: u64) -> bool {
        now < self.expires_at
    }

    /// Whether this signature covers the given account and contract
    pub fn covers(&self, account: Address, contract: Address) -> bool {
        self.account == account && self.contract == contract
    }
}

impl std::fmt::Debug for DecryptionSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionSignature")
            .field("account", &self.account.short())
            .field("contract", &self.contract.short())
            .field("signature", &hex::encode(&self.signature[..self.signature.len().min(8)]))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Cache key: one signature per (account, contract)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureKey {
    pub account: Address,
    pub contract: Address,
}

impl SignatureKey {
    pub fn new(account: Address, contract: Address) -> Self {
        Self { account, contract }
    }
}

/// Storage for decryption signatures, shared across requests
pub trait SignatureCache: Send + Sync {
    /// Fetch a stored signature, valid or not
    fn get(&self, key: &SignatureKey) -> Option<DecryptionSignature>;

    /// Store a signature under its own key
    fn put(&self, signature: DecryptionSignature);

    /// Drop a stored signature
    fn remove(&self, key: &SignatureKey);

    /// Fetch a signature that is still valid at `now`, evicting an expired one
    fn load_valid(&self, key: &SignatureKey, now: u64) -> Option<DecryptionSignature> {
        match self.get(key) {
            Some(signature) if signature.is_valid_at(now) => Some(signature),
            Some(_) => {
                self.remove(key);
                None
            }
            None => None,
        }
    }
}

/// Process-local signature cache
#[derive(Default)]
pub struct InMemorySignatureCache {
    entries: RwLock<HashMap<SignatureKey, DecryptionSignature>>,
}

impl InMemorySignatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl SignatureCache for InMemorySignatureCache {
    fn get(&self, key: &SignatureKey) -> Option<DecryptionSignature> {
        self.entries.read().get(key).cloned()
    }

    fn put(&self, signature: DecryptionSignature) {
        self.entries.write().insert(signature.key(), signature);
    }

    fn remove(&self, key: &SignatureKey) {
        self.entries.write().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature(account: u8, contract: u8, expires_at: u64) -> DecryptionSignature {
        DecryptionSignature {
            account: Address([account; 20]),
            contract: Address([contract; 20]),
            signature: vec![0xab; 65],
            issued_at: 0,
            expires_at,
        }
    }

    #[test]
    fn test_validity() {
        let sig = signature(1, 2, 100);
        assert!(sig.is_valid_at(99));
        assert!(!sig.is_valid_at(100));
        assert!(sig.covers(Address([1; 20]), Address([2; 20])));
        assert!(!sig.covers(Address([2; 20]), Address([2; 20])));
    }

    #[test]
    fn test_cache_is_keyed_by_account_and_contract() {
        let cache = InMemorySignatureCache::new();
        cache.put(signature(1, 2, 100));
        cache.put(signature(1, 3, 100));
        cache.put(signature(1, 2, 200)); // replaces the first

        assert_eq!(cache.len(), 2);
        let key = SignatureKey::new(Address([1; 20]), Address([2; 20]));
        assert_eq!(cache.get(&key).unwrap().expires_at, 200);
        assert!(cache.get(&SignatureKey::new(Address([9; 20]), Address([2; 20]))).is_none());
    }

    #[test]
    fn test_load_valid_evicts_expired() {
        let cache = InMemorySignatureCache::new();
        let sig = signature(1, 2, 100);
        let key = sig.key();
        cache.put(sig);

        assert!(cache.load_valid(&key, 50).is_some());
        assert!(cache.load_valid(&key, 150).is_none());
        assert!(cache.is_empty());
    }
}
