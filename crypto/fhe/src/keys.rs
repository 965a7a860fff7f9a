//! FHE Key Management
//!
//! One key set per runtime:
//! - ClientKey: encrypts inputs and decrypts authorized results
//! - ServerKey: evaluates the category circuit on ciphertexts
//!
//! TFHE-rs keeps the server key in thread-local storage, so every thread that
//! evaluates ciphertexts must call [`KeySet::install`] first.

use crate::{FheConfig, FheError, FheResult};
use tfhe::{generate_keys, ConfigBuilder};
use tfhe::{ClientKey as TfheClientKey, ServerKey as TfheServerKey};
use tracing::debug;

/// Client and server keys generated together
#[derive(Clone)]
pub struct KeySet {
    client: TfheClientKey,
    server: TfheServerKey,
    /// Configuration hash for versioning
    config_hash: [u8; 32],
}

impl KeySet {
    /// Generate a fresh key set. Slow: seconds even in release builds.
    pub fn generate(config: &FheConfig) -> FheResult<Self> {
        config.validate()?;

        let started = std::time::Instant::now();
        let (client, server) = generate_keys(ConfigBuilder::default().build());
        debug!("Generated FHE keys in {:?}", started.elapsed());

        Ok(Self {
            client,
            server,
            config_hash: config.hash(),
        })
    }

    /// Make the server key available to the current thread
    pub fn install(&self) {
        tfhe::set_server_key(self.server.clone());
    }

    pub fn client(&self) -> &TfheClientKey {
        &self.client
    }

    pub fn server(&self) -> &TfheServerKey {
        &self.server
    }

    pub fn config_hash(&self) -> &[u8; 32] {
        &self.config_hash
    }

    /// Whether these keys were generated for `config`
    pub fn matches_config(&self, config: &FheConfig) -> bool {
        self.config_hash == config.hash()
    }

    /// Serialized client key
    pub fn client_key_bytes(&self) -> FheResult<Vec<u8>> {
        bincode::serialize(&self.client).map_err(|e| FheError::SerializationError(e.to_string()))
    }
}

impl std::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySet")
            .field("config_hash", &hex::encode(&self.config_hash[..8]))
            .finish()
    }
}
