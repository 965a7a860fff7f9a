//! Init Command - Write a default configuration

use std::fs;
use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::config::{default_config_path, BmiConfig};

/// Initialize a data directory
#[derive(Args)]
pub struct InitCommand {
    /// Network to initialize for (local, testnet)
    #[arg(short, long, default_value = "local")]
    network: String,

    /// Force overwrite existing configuration
    #[arg(short, long)]
    force: bool,
}

impl InitCommand {
    pub async fn execute(self, data_dir: PathBuf) -> anyhow::Result<()> {
        let config_path = default_config_path(&data_dir);

        info!("Initializing FHE-BMI for {} network", self.network);
        info!("Data directory: {}", data_dir.display());

        if config_path.exists() && !self.force {
            anyhow::bail!(
                "Already initialized at {}. Use --force to overwrite.",
                data_dir.display()
            );
        }

        fs::create_dir_all(&data_dir)?;
        let config = BmiConfig::for_network(&self.network);
        config.save(&config_path)?;

        info!("Configuration saved to {}", config_path.display());

        println!();
        println!("✅ FHE-BMI initialized successfully!");
        println!();
        println!("Configuration: {}", config_path.display());
        println!();
        println!("List networks and deployment status:");
        println!("  fhe-bmi networks --data-dir {}", data_dir.display());
        println!();
        println!("Calculate a BMI category on encrypted inputs:");
        println!(
            "  fhe-bmi calculate --height 170 --weight 65 --data-dir {}",
            data_dir.display()
        );

        Ok(())
    }
}
