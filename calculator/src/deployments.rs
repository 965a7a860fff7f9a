//! Contract deployments per chain
//!
//! Maps chain ids to the FHEBMICalculator contract address. An entry with
//! the zero address is a known network where the contract has not been
//! deployed yet.

use crate::types::{Address, ChainId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the deployed contract
pub const CONTRACT_NAME: &str = "FHEBMICalculator";

/// A contract deployment on one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub chain_id: ChainId,
    pub chain_name: String,
    pub address: Address,
}

impl Deployment {
    pub fn new(chain_id: ChainId, chain_name: impl Into<String>, address: Address) -> Self {
        Self {
            chain_id,
            chain_name: chain_name.into(),
            address,
        }
    }

    pub fn is_deployed(&self) -> bool {
        !self.address.is_zero()
    }
}

/// Registry of known deployments
#[derive(Debug, Clone, Default)]
pub struct DeploymentRegistry {
    deployments: BTreeMap<ChainId, Deployment>,
}

impl DeploymentRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Hardhat and Sepolia entries, both undeployed
    pub fn with_known_networks() -> Self {
        let mut registry = Self::new();
        registry.insert(Deployment::new(ChainId::SEPOLIA, "sepolia", Address::ZERO));
        registry.insert(Deployment::new(ChainId::HARDHAT, "hardhat", Address::ZERO));
        registry
    }

    /// Add or replace the deployment for a chain
    pub fn insert(&mut self, deployment: Deployment) -> Option<Deployment> {
        self.deployments.insert(deployment.chain_id, deployment)
    }

    /// Builder-style insert
    pub fn with(mut self, deployment: Deployment) -> Self {
        self.insert(deployment);
        self
    }

    pub fn get(&self, chain_id: ChainId) -> Option<&Deployment> {
        self.deployments.get(&chain_id)
    }

    /// Contract address on a chain, `None` if unknown or not deployed
    pub fn contract_address(&self, chain_id: ChainId) -> Option<Address> {
        self.get(chain_id)
            .filter(|d| d.is_deployed())
            .map(|d| d.address)
    }

    pub fn is_deployed(&self, chain_id: ChainId) -> bool {
        self.contract_address(chain_id).is_some()
    }

    /// Deployments ordered by chain id
    pub fn iter(&self) -> impl Iterator<Item = &Deployment> {
        self.deployments.values()
    }

    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }

    /// Guidance shown when the contract is missing on a chain
    pub fn not_deployed_hint(&self, chain_id: ChainId) -> String {
        let network = self
            .get(chain_id)
            .map(|d| d.chain_name.as_str())
            .filter(|name| !name.is_empty() && *name != "hardhat")
            .unwrap_or("your-network-name");

        format!(
            "{} contract is not deployed on chainId={}. Deploy it with \
             `npx hardhat deploy --network {}`, or switch to a local Hardhat node.",
            CONTRACT_NAME, chain_id, network
        )
    }
}
