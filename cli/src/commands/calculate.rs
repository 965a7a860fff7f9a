//! Calculate Command - Full encrypted BMI flow against the local FHE runtime

use std::sync::Arc;

use clap::Args;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use fhe_bmi::config::DEFAULT_LOCAL_ACCOUNT;
use fhe_bmi::session::{BmiReport, BmiSession};
use fhe_bmi_calculator::{
    Address, ChainId, ControllerEvent, InMemorySignatureCache, Phase, WalletContext,
};
use fhe_bmi_fhe::LocalFhevm;

use crate::config::BmiConfig;

/// Encrypt height and weight, compute the category and decrypt it
#[derive(Args)]
pub struct CalculateCommand {
    /// Height in centimetres
    #[arg(long)]
    height: u32,

    /// Weight in kilograms
    #[arg(long)]
    weight: u32,

    /// Account to calculate for (defaults to the first hardhat account)
    #[arg(long)]
    account: Option<String>,

    /// Chain to use (defaults to the local runtime's chain)
    #[arg(long)]
    chain_id: Option<u64>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

impl CalculateCommand {
    pub async fn execute(self, config: &BmiConfig) -> anyhow::Result<()> {
        let registry = config.registry()?;
        let fhe_config = config.fhe_config()?;
        let chain_id = self.chain_id.map(ChainId).unwrap_or(fhe_config.chain_id);

        // Checked before key generation, which takes a while
        if !registry.is_deployed(chain_id) {
            anyhow::bail!("{}", registry.not_deployed_hint(chain_id));
        }
        if chain_id != fhe_config.chain_id {
            anyhow::bail!(
                "The local FHE runtime serves chain {} only, not {}",
                fhe_config.chain_id,
                chain_id
            );
        }

        let account: Address = match &self.account {
            Some(account) => account.parse()?,
            None => DEFAULT_LOCAL_ACCOUNT,
        };

        let fhevm = LocalFhevm::start(fhe_config).await?;
        let session = BmiSession::new(
            config.controller_config(),
            WalletContext::connected(account, chain_id),
            registry,
            fhevm.collaborators(Arc::new(InMemorySignatureCache::new())),
        );
        let progress = spawn_progress_logger(&session);

        let result = session.run(self.height, self.weight).await;
        progress.abort();
        let report = result?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report_json(&report, account))?);
        } else {
            print_report(&report, account);
        }

        session.shutdown();
        Ok(())
    }
}

/// Log the controller's status message on every phase change
fn spawn_progress_logger(session: &BmiSession) -> tokio::task::JoinHandle<()> {
    let controller = session.controller().clone();
    let events = controller.subscribe();

    tokio::spawn(log_progress(events, move |phase| {
        info!("[{}] {}", phase, controller.message());
    }))
}

/// Forward phase changes to `log` until the controller goes away.
/// Returns the number of phase changes seen.
async fn log_progress(
    mut events: broadcast::Receiver<ControllerEvent>,
    mut log: impl FnMut(Phase) + Send,
) -> usize {
    let mut seen = 0;
    loop {
        match events.recv().await {
            Ok(ControllerEvent::PhaseChanged { phase, .. }) => {
                seen += 1;
                log(phase);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Progress log skipped {} controller events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    seen
}

fn report_json(report: &BmiReport, account: Address) -> serde_json::Value {
    serde_json::json!({
        "account": account.to_string(),
        "requestId": report.request_id,
        "handle": report.handle.to_string(),
        "category": report.category.index(),
        "categoryName": report.category.name(),
        "elapsedMs": report.elapsed.as_millis() as u64,
    })
}

fn print_report(report: &BmiReport, account: Address) {
    println!();
    println!("✅ BMI category decrypted");
    println!();
    println!("Account:   {}", account);
    println!("Handle:    {}", report.handle);
    println!("Category:  {}", report.category);
    println!("Elapsed:   {:.1?}", report.elapsed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhe_bmi_calculator::{BmiCategory, CiphertextHandle, Measurements};
    use std::time::Duration;

    #[test]
    fn test_report_json() {
        let report = BmiReport {
            request_id: 3,
            measurements: Measurements::new(170, 65),
            handle: CiphertextHandle([0xab; 32]),
            category: BmiCategory::Normal,
            elapsed: Duration::from_millis(1500),
        };

        let value = report_json(&report, DEFAULT_LOCAL_ACCOUNT);
        assert_eq!(value["category"], 1);
        assert_eq!(value["categoryName"], "Normal");
        assert_eq!(value["requestId"], 3);
        assert_eq!(value["elapsedMs"], 1500);
    }

    #[tokio::test]
    async fn test_progress_survives_lagging() {
        let (tx, rx) = broadcast::channel(2);
        for generation in 0..5 {
            tx.send(ControllerEvent::PhaseChanged {
                generation,
                phase: Phase::Encrypting,
            })
            .unwrap();
        }
        drop(tx);

        // Three events are dropped, the two most recent are still logged
        let mut phases = Vec::new();
        let seen = log_progress(rx, |phase| phases.push(phase)).await;
        assert_eq!(seen, 2);
        assert_eq!(phases, vec![Phase::Encrypting, Phase::Encrypting]);
    }
}
