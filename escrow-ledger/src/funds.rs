//! Funds Rail - Account balances behind the ledger
//!
//! The ledger never edits committed balances in place. Deposits on `create`
//! and payouts on `approve` are staged on a copy of the [`Balances`], written
//! inside the ledger snapshot and only then handed back to the [`FundsRail`]
//! with `commit`. Records and balances become durable in the same write.

use crate::{
    error::LedgerError,
    models::{AccountId, Amount},
    LedgerResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::debug;

/// Value transfer mechanism used by the ledger
#[async_trait]
pub trait FundsRail: Send + Sync {
    /// Account that holds custodied value on behalf of the ledger
    fn custody_account(&self) -> &AccountId;

    /// Copy of the committed balances to stage transfers on
    async fn balances(&self) -> Balances;

    /// Adopt balances the ledger has made durable
    async fn commit(&self, balances: Balances);

    /// Committed balance of an account
    async fn balance_of(&self, account: &AccountId) -> LedgerResult<Amount> {
        Ok(self.balances().await.balance(account))
    }
}

/// Per-account balances
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    accounts: BTreeMap<AccountId, Amount>,
    /// Accounts that refuse incoming transfers
    #[serde(default)]
    rejecting: BTreeSet<AccountId>,
}

impl Balances {
    pub fn balance(&self, account: &AccountId) -> Amount {
        self.accounts.get(account).copied().unwrap_or(0)
    }

    pub fn rejects_incoming(&self, account: &AccountId) -> bool {
        self.rejecting.contains(account)
    }

    /// Move `amount` from `from` to `to`, all or nothing.
    ///
    /// A transfer from an account to itself moves no value and is refused.
    pub fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: Amount) -> LedgerResult<()> {
        if from == to {
            return Err(LedgerError::transfer(format!(
                "cannot transfer from {} to itself",
                from
            )));
        }

        if amount == 0 {
            return Ok(());
        }

        if self.rejects_incoming(to) {
            return Err(LedgerError::transfer(format!(
                "account {} rejects incoming transfers",
                to
            )));
        }

        let available = self.balance(from);
        if available < amount {
            return Err(LedgerError::transfer(format!(
                "insufficient funds in {}: has {}, needs {}",
                from, available, amount
            )));
        }

        let credited = self
            .balance(to)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::transfer(format!("balance of {} overflows", to)))?;

        self.accounts.insert(from.clone(), available - amount);
        self.accounts.insert(to.clone(), credited);
        Ok(())
    }

    /// Credit an account out of thin air (development faucet)
    pub fn credit(&mut self, account: &AccountId, amount: Amount) -> LedgerResult<Amount> {
        let balance = self
            .balance(account)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::transfer(format!("balance of {} overflows", account)))?;
        self.accounts.insert(account.clone(), balance);
        Ok(balance)
    }

    /// Make an account refuse or accept incoming transfers
    pub fn set_rejects_incoming(&mut self, account: &AccountId, rejects: bool) {
        if rejects {
            self.rejecting.insert(account.clone());
        } else {
            self.rejecting.remove(account);
        }
    }
}

/// Configuration for the local bank
#[derive(Debug, Clone)]
pub struct LocalBankConfig {
    /// Account holding custodied funds
    pub custody_account: AccountId,
}

impl Default for LocalBankConfig {
    fn default() -> Self {
        Self {
            custody_account: AccountId::from("escrow-ledger"),
        }
    }
}

/// Account balances held in process.
///
/// Stands in for the settlement network in development and tests. Its
/// balances are persisted by the ledger that commits to it.
pub struct LocalBank {
    config: LocalBankConfig,
    committed: RwLock<Balances>,
}

impl LocalBank {
    /// Create a bank with no funded accounts
    pub fn new(config: LocalBankConfig) -> Self {
        Self::with_balances(config, Balances::default())
    }

    /// Create a bank starting from `balances`
    pub fn with_balances(config: LocalBankConfig, balances: Balances) -> Self {
        Self {
            config,
            committed: RwLock::new(balances),
        }
    }
}

#[async_trait]
impl FundsRail for LocalBank {
    fn custody_account(&self) -> &AccountId {
        &self.config.custody_account
    }

    async fn balances(&self) -> Balances {
        self.committed.read().await.clone()
    }

    async fn commit(&self, balances: Balances) {
        debug!("Committed balances for {} accounts", balances.accounts.len());
        *self.committed.write().await = balances;
    }

    async fn balance_of(&self, account: &AccountId) -> LedgerResult<Amount> {
        Ok(self.committed.read().await.balance(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded(account: &str, amount: Amount) -> Balances {
        let mut balances = Balances::default();
        balances.credit(&account.into(), amount).unwrap();
        balances
    }

    #[test]
    fn test_transfer_moves_balance() {
        let mut balances = funded("alice", 100);
        let alice = AccountId::from("alice");
        let bob = AccountId::from("bob");

        balances.transfer(&alice, &bob, 40).unwrap();

        assert_eq!(balances.balance(&alice), 60);
        assert_eq!(balances.balance(&bob), 40);
    }

    #[test]
    fn test_insufficient_funds() {
        let mut balances = funded("alice", 10);
        let alice = AccountId::from("alice");
        let bob = AccountId::from("bob");

        match balances.transfer(&alice, &bob, 11) {
            Err(LedgerError::TransferFailure(msg)) => assert!(msg.contains("insufficient")),
            other => panic!("Expected transfer failure, got {:?}", other),
        }
        assert_eq!(balances.balance(&alice), 10);
        assert_eq!(balances.balance(&bob), 0);
    }

    #[test]
    fn test_rejecting_account() {
        let mut balances = funded("alice", 10);
        let alice = AccountId::from("alice");
        let contract = AccountId::from("contract-without-receive");

        balances.set_rejects_incoming(&contract, true);
        assert!(balances.transfer(&alice, &contract, 5).is_err());
        assert_eq!(balances.balance(&alice), 10);

        balances.set_rejects_incoming(&contract, false);
        balances.transfer(&alice, &contract, 5).unwrap();
        assert_eq!(balances.balance(&contract), 5);
    }

    #[test]
    fn test_self_transfer_is_refused() {
        let mut balances = funded("vault", 50);
        let vault = AccountId::from("vault");

        assert!(matches!(
            balances.transfer(&vault, &vault, 50),
            Err(LedgerError::TransferFailure(_))
        ));
        assert!(balances.transfer(&vault, &vault, 0).is_err());
        assert_eq!(balances.balance(&vault), 50);
    }

    #[test]
    fn test_zero_transfer_needs_no_funds() {
        let mut balances = Balances::default();
        balances
            .transfer(&"nobody".into(), &"somebody".into(), 0)
            .unwrap();
    }

    #[tokio::test]
    async fn test_bank_serves_committed_balances_only() {
        let bank = LocalBank::new(LocalBankConfig::default());
        let alice = AccountId::from("alice");

        let mut staged = bank.balances().await;
        staged.credit(&alice, 77).unwrap();
        assert_eq!(bank.balance_of(&alice).await.unwrap(), 0);

        bank.commit(staged).await;
        assert_eq!(bank.balance_of(&alice).await.unwrap(), 77);
    }
}
