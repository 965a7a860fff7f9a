//! CLI Configuration
//!
//! Handles loading and saving the calculator configuration from TOML files.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fhe_bmi_calculator::{Address, ChainId, ControllerConfig, Deployment, DeploymentRegistry};
use fhe_bmi_fhe::{FheConfig, LOCAL_CONTRACT_ADDRESS, LOCAL_PROTOCOL_ID};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Full CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BmiConfig {
    /// Controller settings
    #[serde(default)]
    pub controller: ControllerSettings,

    /// Known contract deployments
    #[serde(default = "default_deployments")]
    pub deployments: Vec<DeploymentSettings>,

    /// Local FHE runtime settings
    #[serde(default)]
    pub fhe: FheSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for BmiConfig {
    fn default() -> Self {
        Self {
            controller: ControllerSettings::default(),
            deployments: default_deployments(),
            fhe: FheSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl BmiConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file if present, local defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => Ok(Self::local()),
            other => other,
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Create configuration for a specific network
    pub fn for_network(network: &str) -> Self {
        match network {
            "testnet" | "sepolia" => Self::testnet(),
            _ => Self::local(),
        }
    }

    /// Local hardhat node with the contract at its first deployment address
    pub fn local() -> Self {
        let mut deployments = default_deployments();
        for deployment in deployments.iter_mut() {
            if deployment.chain_id == ChainId::HARDHAT.0 {
                deployment.address = LOCAL_CONTRACT_ADDRESS.to_string();
            }
        }

        Self {
            controller: ControllerSettings {
                confirmation_timeout_secs: 30,
                ..Default::default()
            },
            deployments,
            ..Default::default()
        }
    }

    /// Sepolia, pending a deployment
    pub fn testnet() -> Self {
        Self {
            controller: ControllerSettings {
                confirmation_timeout_secs: 600,
                ..Default::default()
            },
            fhe: FheSettings {
                chain_id: ChainId::SEPOLIA.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.controller;
        if c.confirmation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "Confirmation timeout must be greater than 0".to_string(),
            ));
        }
        if c.signature_validity_secs == 0 {
            return Err(ConfigError::Invalid(
                "Signature validity must be greater than 0".to_string(),
            ));
        }
        if c.min_height_cm > c.max_height_cm || c.min_weight_kg > c.max_weight_kg {
            return Err(ConfigError::Invalid(
                "Input ranges must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for deployment in &self.deployments {
            if !seen.insert(deployment.chain_id) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate deployment for chain {}",
                    deployment.chain_id
                )));
            }
            parse_address(&deployment.address)?;
        }

        let fhe = self.fhe_config()?;
        fhe.validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        // The local runtime only hosts the contract at its configured address
        if let Some(address) = self.registry()?.contract_address(fhe.chain_id) {
            if address != fhe.contract_address {
                return Err(ConfigError::Invalid(format!(
                    "Deployment on chain {} ({}) does not match the FHE runtime contract ({})",
                    fhe.chain_id, address, fhe.contract_address
                )));
            }
        }

        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let c = &self.controller;
        ControllerConfig {
            confirmation_timeout: Duration::from_secs(c.confirmation_timeout_secs),
            signature_validity: Duration::from_secs(c.signature_validity_secs),
            height_range: c.min_height_cm..=c.max_height_cm,
            weight_range: c.min_weight_kg..=c.max_weight_kg,
        }
    }

    pub fn registry(&self) -> Result<DeploymentRegistry, ConfigError> {
        let mut registry = DeploymentRegistry::new();
        for d in &self.deployments {
            registry.insert(Deployment::new(
                ChainId(d.chain_id),
                d.name.clone(),
                parse_address(&d.address)?,
            ));
        }
        Ok(registry)
    }

    pub fn fhe_config(&self) -> Result<FheConfig, ConfigError> {
        Ok(FheConfig {
            security_bits: self.fhe.security_bits,
            chain_id: ChainId(self.fhe.chain_id),
            contract_address: parse_address(&self.fhe.contract_address)?,
            protocol_id: self.fhe.protocol_id,
        })
    }
}

fn parse_address(s: &str) -> Result<Address, ConfigError> {
    s.parse().map_err(|e: fhe_bmi_calculator::AddressParseError| ConfigError::Invalid(e.to_string()))
}

/// Controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Seconds to wait for transaction inclusion
    pub confirmation_timeout_secs: u64,

    /// Lifetime of new decryption signatures in seconds
    pub signature_validity_secs: u64,

    /// Accepted height range (cm)
    pub min_height_cm: u32,
    pub max_height_cm: u32,

    /// Accepted weight range (kg)
    pub min_weight_kg: u32,
    pub max_weight_kg: u32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        let defaults = ControllerConfig::default();
        Self {
            confirmation_timeout_secs: defaults.confirmation_timeout.as_secs(),
            signature_validity_secs: defaults.signature_validity.as_secs(),
            min_height_cm: *defaults.height_range.start(),
            max_height_cm: *defaults.height_range.end(),
            min_weight_kg: *defaults.weight_range.start(),
            max_weight_kg: *defaults.weight_range.end(),
        }
    }
}

/// A contract deployment entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSettings {
    /// EVM chain id
    pub chain_id: u64,

    /// Network name, as passed to `hardhat deploy --network`
    pub name: String,

    /// Contract address, all zeros when not deployed
    pub address: String,
}

fn default_deployments() -> Vec<DeploymentSettings> {
    DeploymentRegistry::with_known_networks()
        .iter()
        .map(|d| DeploymentSettings {
            chain_id: d.chain_id.0,
            name: d.chain_name.clone(),
            address: d.address.to_string(),
        })
        .collect()
}

/// Local FHE runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FheSettings {
    /// Security parameter (bits)
    pub security_bits: u32,

    /// Chain id the runtime reports
    pub chain_id: u64,

    /// Address the runtime hosts the contract at
    pub contract_address: String,

    /// Value returned by `protocolId()`
    pub protocol_id: u64,
}

impl Default for FheSettings {
    fn default() -> Self {
        Self {
            security_bits: 128,
            chain_id: ChainId::HARDHAT.0,
            contract_address: LOCAL_CONTRACT_ADDRESS.to_string(),
            protocol_id: LOCAL_PROTOCOL_ID,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level
    pub level: String,

    /// Output format (text, json)
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Get default data directory
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "fhe-bmi", "fhe-bmi")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".fhe-bmi"))
}

/// Get default config file path
pub fn default_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}
