//! FHE-BMI CLI
//!
//! Command-line interface for private BMI calculation.
//!
//! # Usage
//!
//! ```bash
//! # Write a default configuration
//! fhe-bmi init --network local
//!
//! # Show where the contract is deployed
//! fhe-bmi networks
//!
//! # Encrypt, compute and decrypt a BMI category
//! fhe-bmi calculate --height 170 --weight 65
//!
//! # Same, for another account, with JSON output
//! fhe-bmi calculate --height 180 --weight 95 --account 0x7099... --json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod logging;

use commands::{CalculateCommand, InitCommand, NetworksCommand};
use config::{default_config_path, default_data_dir, BmiConfig};
use logging::LogFormat;

/// Private BMI categories on encrypted inputs
#[derive(Parser)]
#[command(name = "fhe-bmi")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "BMI categories computed on encrypted height and weight", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(short, long, global = true, env = "FHE_BMI_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration
    Init(InitCommand),

    /// List networks and deployment status
    Networks(NetworksCommand),

    /// Calculate a BMI category on encrypted inputs
    Calculate(CalculateCommand),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(&data_dir));
    let config = BmiConfig::load_or_default(&config_path)?;

    // Initialize logging
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::parse(&config.logging.format)
    };
    logging::init(&level, format)?;

    // Execute command
    match cli.command {
        Commands::Init(cmd) => cmd.execute(data_dir).await,
        Commands::Networks(cmd) => cmd.execute(&config),
        Commands::Calculate(cmd) => cmd.execute(&config).await,
        Commands::Version => {
            println!("fhe-bmi {}", fhe_bmi::VERSION);
            println!("Contract: {}", fhe_bmi_calculator::CONTRACT_NAME);
            println!("FHE: TFHE-rs, 128-bit security");
            Ok(())
        }
    }
}
