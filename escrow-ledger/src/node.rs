//! Escrow Node - Wires the ledger to its store, rail and event channel
//!
//! This module builds a ready-to-use ledger from [`LedgerConfig`] and
//! exposes the operations external callers (CLI, tests) need.

use crate::{
    config::LedgerConfig,
    events::{EventPublisher, LedgerEvent},
    funds::{FundsRail, LocalBank},
    ledger::EscrowLedger,
    models::{AccountId, Amount, EscrowId, EscrowRecord},
    store::{FileStore, LedgerStore, MemoryStore},
    LedgerResult,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Ledger plus the local bank that funds it
pub struct EscrowNode {
    /// Escrow ledger for record lifecycle and custody
    ledger: Arc<EscrowLedger>,
    /// Local bank holding committed account balances
    bank: Arc<LocalBank>,
}

/// Node health status
#[derive(Debug, Clone)]
pub struct NodeHealth {
    pub healthy: bool,
    /// One line per violated check
    pub issues: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl EscrowNode {
    /// Create a node with all components initialized
    pub async fn new(config: &LedgerConfig) -> LedgerResult<Self> {
        info!(
            "Initializing escrow node (data_dir: {}, persist: {})",
            config.data_dir.display(),
            config.persist
        );

        let store: Arc<dyn LedgerStore> = if config.persist {
            Arc::new(FileStore::new(config.ledger_path()))
        } else {
            Arc::new(MemoryStore::new())
        };
        let bank = Arc::new(LocalBank::new(config.bank_config()));
        let publisher = EventPublisher::new(config.event_config());

        let ledger = Arc::new(EscrowLedger::open(bank.clone(), store, publisher).await?);

        Ok(Self { ledger, bank })
    }

    pub fn ledger(&self) -> &Arc<EscrowLedger> {
        &self.ledger
    }

    pub fn bank(&self) -> &Arc<LocalBank> {
        &self.bank
    }

    /// Create an escrow funded by `depositor`
    pub async fn create(
        &self,
        depositor: &AccountId,
        arbiter: &AccountId,
        beneficiary: &AccountId,
        value: Amount,
    ) -> LedgerResult<EscrowId> {
        self.ledger.create(depositor, arbiter, beneficiary, value).await
    }

    /// Approve an escrow as `arbiter`
    pub async fn approve(&self, arbiter: &AccountId, id: EscrowId) -> LedgerResult<()> {
        self.ledger.approve(arbiter, id).await
    }

    pub async fn get_record(&self, id: EscrowId) -> LedgerResult<EscrowRecord> {
        self.ledger.get_record(id).await
    }

    pub async fn list_records(&self) -> Vec<EscrowRecord> {
        self.ledger.list_records().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.ledger.subscribe()
    }

    /// Balance of any account on the local bank
    pub async fn balance_of(&self, account: &AccountId) -> LedgerResult<Amount> {
        self.bank.balance_of(account).await
    }

    /// Credit a development account (faucet), returning its new balance
    pub async fn mint(&self, account: &AccountId, amount: Amount) -> LedgerResult<Amount> {
        let balance = self
            .ledger
            .adjust_balances(|balances| balances.credit(account, amount))
            .await?;
        info!("Minted {} to {} (balance: {})", amount, account, balance);
        Ok(balance)
    }

    /// Make an account refuse or accept incoming transfers
    pub async fn set_rejects_incoming(&self, account: &AccountId, rejects: bool) -> LedgerResult<()> {
        self.ledger
            .adjust_balances(|balances| {
                balances.set_rejects_incoming(account, rejects);
                Ok(())
            })
            .await?;
        info!("Account {} rejects incoming transfers: {}", account, rejects);
        Ok(())
    }

    /// Health check: ledger invariant and custody account agreement
    pub async fn health_check(&self) -> LedgerResult<NodeHealth> {
        let mut issues = Vec::new();

        if let Err(e) = self.ledger.verify_invariant().await {
            issues.push(format!("Ledger invariant violated: {}", e));
        }

        let (custody, held) = self.ledger.custody_position().await;
        if held != custody {
            issues.push(format!(
                "Custody account {} holds {} but ledger owes {}",
                self.bank.custody_account(),
                held,
                custody
            ));
        }

        if !issues.is_empty() {
            warn!("Escrow node unhealthy: {:?}", issues);
        }

        Ok(NodeHealth {
            healthy: issues.is_empty(),
            issues,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> LedgerConfig {
        LedgerConfig {
            persist: false,
            ..LedgerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_node_initialization() {
        let node = EscrowNode::new(&memory_config()).await.unwrap();

        let health = node.health_check().await.unwrap();
        assert!(health.healthy);
        assert!(node.list_records().await.is_empty());
    }

    #[tokio::test]
    async fn test_health_flags_foreign_custody_funds() {
        let node = EscrowNode::new(&memory_config()).await.unwrap();
        let custody = node.bank().custody_account().clone();
        node.mint(&custody, 5).await.unwrap();

        let health = node.health_check().await.unwrap();
        assert!(!health.healthy);
        assert_eq!(health.issues.len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_node_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig {
            data_dir: dir.path().to_path_buf(),
            ..LedgerConfig::default()
        };
        let alice = AccountId::from("alice");
        let arbiter = AccountId::from("arbiter");
        let bob = AccountId::from("bob");

        let node = EscrowNode::new(&config).await.unwrap();
        node.mint(&alice, 10).await.unwrap();
        let id = node.create(&alice, &arbiter, &bob, 10).await.unwrap();
        drop(node);

        let node = EscrowNode::new(&config).await.unwrap();
        assert_eq!(node.get_record(id).await.unwrap().amount, 10);
        assert_eq!(node.balance_of(&alice).await.unwrap(), 0);
        node.approve(&arbiter, id).await.unwrap();
        assert_eq!(node.balance_of(&bob).await.unwrap(), 10);
        assert!(node.health_check().await.unwrap().healthy);
    }

    #[tokio::test]
    async fn test_rejecting_account_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig {
            data_dir: dir.path().to_path_buf(),
            ..LedgerConfig::default()
        };
        let alice = AccountId::from("alice");
        let contract = AccountId::from("contract-without-receive");

        let node = EscrowNode::new(&config).await.unwrap();
        node.mint(&alice, 10).await.unwrap();
        node.set_rejects_incoming(&contract, true).await.unwrap();
        node.create(&alice, &alice, &contract, 10).await.unwrap();
        drop(node);

        let node = EscrowNode::new(&config).await.unwrap();
        assert!(matches!(
            node.approve(&alice, 0).await,
            Err(crate::error::LedgerError::TransferFailure(_))
        ));
        assert!(node.health_check().await.unwrap().healthy);
    }
}
