//! Networks Command - List deployments and their status

use clap::Args;
use fhe_bmi_calculator::{Deployment, DeploymentRegistry, CONTRACT_NAME};

use crate::config::BmiConfig;

/// List known networks
#[derive(Args)]
pub struct NetworksCommand {
    /// Print as JSON
    #[arg(long)]
    json: bool,
}

impl NetworksCommand {
    pub fn execute(self, config: &BmiConfig) -> anyhow::Result<()> {
        let registry = config.registry()?;

        if self.json {
            let entries: Vec<_> = registry.iter().map(deployment_json).collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }

        println!("{} deployments:", CONTRACT_NAME);
        println!();
        println!("{:<12} {:<12} {:<44} Status", "Chain ID", "Network", "Address");
        for deployment in registry.iter() {
            println!(
                "{:<12} {:<12} {:<44} {}",
                deployment.chain_id.to_string(),
                deployment.chain_name,
                deployment.address.to_string(),
                status(deployment)
            );
        }

        print_hints(&registry);
        Ok(())
    }
}

fn status(deployment: &Deployment) -> &'static str {
    if deployment.is_deployed() {
        "✅ deployed"
    } else {
        "❌ not deployed"
    }
}

fn deployment_json(deployment: &Deployment) -> serde_json::Value {
    serde_json::json!({
        "chainId": deployment.chain_id.0,
        "chainName": deployment.chain_name,
        "address": deployment.address.to_string(),
        "deployed": deployment.is_deployed(),
    })
}

fn print_hints(registry: &DeploymentRegistry) {
    let missing: Vec<_> = registry.iter().filter(|d| !d.is_deployed()).collect();
    if missing.is_empty() {
        return;
    }

    println!();
    for deployment in missing {
        println!("{}", registry.not_deployed_hint(deployment.chain_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhe_bmi_calculator::{Address, ChainId};

    #[test]
    fn test_deployment_json() {
        let deployment = Deployment::new(ChainId::HARDHAT, "hardhat", Address([1; 20]));
        let value = deployment_json(&deployment);
        assert_eq!(value["chainId"], 31337);
        assert_eq!(value["deployed"], true);
        assert_eq!(status(&deployment), "✅ deployed");

        let missing = Deployment::new(ChainId::SEPOLIA, "sepolia", Address::ZERO);
        assert_eq!(deployment_json(&missing)["deployed"], false);
    }
}
