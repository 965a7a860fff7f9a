//! Observable wallet context
//!
//! The connected account and selected chain change underneath the
//! controller at any time. `WalletContext` holds the current snapshot in a
//! watch channel so the controller, the chain connector and the UI all
//! observe the same value and get notified on every switch.

use crate::types::{Address, ChainId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Point-in-time view of the wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WalletSnapshot {
    /// Connected account, if any
    pub account: Option<Address>,
    /// Selected chain, if any
    pub chain_id: Option<ChainId>,
    /// Bumped on every real account or chain change, so a switch away and
    /// back still differs from the snapshot taken before it
    #[serde(default)]
    pub epoch: u64,
}

impl WalletSnapshot {
    pub fn connected(account: Address, chain_id: ChainId) -> Self {
        Self {
            account: Some(account),
            chain_id: Some(chain_id),
            epoch: 0,
        }
    }

    /// A wallet is usable only with both an account and a chain
    pub fn is_connected(&self) -> bool {
        self.account.is_some() && self.chain_id.is_some()
    }

    /// Whether this snapshot still refers to the given account and chain
    pub fn matches(&self, account: Address, chain_id: ChainId) -> bool {
        self.account == Some(account) && self.chain_id == Some(chain_id)
    }

    /// Whether this snapshot was taken after a switch away from `bound`
    pub fn is_newer_than(&self, bound: &WalletSnapshot) -> bool {
        self.epoch > bound.epoch
    }
}

/// What changed between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextChange {
    AccountChanged,
    ChainChanged,
    AccountAndChainChanged,
    /// Switched away and back between two observations
    Reverted,
    Unchanged,
}

impl ContextChange {
    pub fn between(old: &WalletSnapshot, new: &WalletSnapshot) -> Self {
        match (old.account != new.account, old.chain_id != new.chain_id) {
            (true, true) => ContextChange::AccountAndChainChanged,
            (true, false) => ContextChange::AccountChanged,
            (false, true) => ContextChange::ChainChanged,
            (false, false) if old.epoch != new.epoch => ContextChange::Reverted,
            (false, false) => ContextChange::Unchanged,
        }
    }
}

/// Shared, observable wallet state
///
/// Cloning is cheap; all clones publish to and read from the same channel.
#[derive(Clone, Debug)]
pub struct WalletContext {
    tx: Arc<watch::Sender<WalletSnapshot>>,
}

impl WalletContext {
    pub fn new(snapshot: WalletSnapshot) -> Self {
        let (tx, _rx) = watch::channel(snapshot);
        Self { tx: Arc::new(tx) }
    }

    /// Context with a connected account on a chain
    pub fn connected(account: Address, chain_id: ChainId) -> Self {
        Self::new(WalletSnapshot::connected(account, chain_id))
    }

    /// Context with no wallet attached
    pub fn disconnected() -> Self {
        Self::new(WalletSnapshot::default())
    }

    /// Current snapshot
    pub fn snapshot(&self) -> WalletSnapshot {
        *self.tx.borrow()
    }

    /// Subscribe to account and chain change notifications
    pub fn subscribe(&self) -> watch::Receiver<WalletSnapshot> {
        self.tx.subscribe()
    }

    /// Switch to another account on the same chain
    pub fn switch_account(&self, account: Address) -> ContextChange {
        self.update(|s| s.account = Some(account))
    }

    /// Switch to another chain with the same account
    pub fn switch_chain(&self, chain_id: ChainId) -> ContextChange {
        self.update(|s| s.chain_id = Some(chain_id))
    }

    /// Connect (or reconnect) a wallet
    pub fn connect(&self, account: Address, chain_id: ChainId) -> ContextChange {
        self.update(|s| *s = WalletSnapshot::connected(account, chain_id))
    }

    /// Drop the wallet connection
    pub fn disconnect(&self) -> ContextChange {
        self.update(|s| *s = WalletSnapshot::default())
    }

    fn update(&self, f: impl FnOnce(&mut WalletSnapshot)) -> ContextChange {
        let mut change = ContextChange::Unchanged;
        // send_if_modified stores the value even without live receivers
        self.tx.send_if_modified(|snapshot| {
            let old = *snapshot;
            f(snapshot);
            snapshot.epoch = old.epoch;
            change = ContextChange::between(&old, snapshot);
            if change == ContextChange::Unchanged {
                return false;
            }
            snapshot.epoch = old.epoch + 1;
            true
        });
        change
    }
}
