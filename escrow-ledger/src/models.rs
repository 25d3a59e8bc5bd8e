//! Core data models for the escrow ledger
//!
//! This module contains the escrow record, its two-state lifecycle, the
//! account identifier and the persisted ledger snapshot.

use crate::{error::LedgerError, funds::Balances, LedgerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Escrow identifier, equal to allocation order
pub type EscrowId = u64;

/// Value in the smallest currency unit (wei)
pub type Amount = u128;

/// Account identifier.
///
/// Comparison is exact byte equality. `0xAbC` and `0xabc` are different
/// accounts as far as the ledger is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Escrow state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowState {
    /// Funds held, awaiting the arbiter
    Pending,
    /// Funds released to the beneficiary
    Approved,
}

impl EscrowState {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Check if this state allows approval
    pub fn can_approve(&self) -> bool {
        !self.is_terminal()
    }
}

/// One custodial escrow entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub id: EscrowId,

    // Parties
    pub depositor: AccountId,
    pub arbiter: AccountId,
    pub beneficiary: AccountId,

    pub amount: Amount,
    pub is_approved: bool,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl EscrowRecord {
    /// Create a new pending record
    pub fn new(
        id: EscrowId,
        depositor: AccountId,
        arbiter: AccountId,
        beneficiary: AccountId,
        amount: Amount,
    ) -> Self {
        Self {
            id,
            depositor,
            arbiter,
            beneficiary,
            amount,
            is_approved: false,
            created_at: Utc::now(),
            approved_at: None,
        }
    }

    pub fn state(&self) -> EscrowState {
        if self.is_approved {
            EscrowState::Approved
        } else {
            EscrowState::Pending
        }
    }

    /// Mark the record approved, refusing a second transition
    pub fn mark_approved(&mut self) -> LedgerResult<()> {
        if !self.state().can_approve() {
            return Err(LedgerError::AlreadyApproved(self.id));
        }
        self.is_approved = true;
        self.approved_at = Some(Utc::now());
        Ok(())
    }
}

/// Complete persisted ledger state.
///
/// `records[i].id == i` and `next_id == records.len()` always hold, so the
/// table doubles as the identifier index. Account balances travel in the
/// same snapshot, so a deposit or payout is durable exactly when the record
/// change that caused it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub records: Vec<EscrowRecord>,
    pub next_id: EscrowId,
    pub custody_balance: Amount,
    #[serde(default)]
    pub balances: Balances,
}

impl LedgerSnapshot {
    /// Sum of amounts still held for unapproved records
    pub fn pending_total(&self) -> Option<Amount> {
        self.records
            .iter()
            .filter(|r| !r.is_approved)
            .try_fold(0u128, |acc, r| acc.checked_add(r.amount))
    }

    /// Check the table, allocator and custody balance against each other
    pub fn validate(&self) -> LedgerResult<()> {
        for (position, record) in self.records.iter().enumerate() {
            if record.id != position as EscrowId {
                return Err(LedgerError::corrupt(format!(
                    "record at position {} carries id {}",
                    position, record.id
                )));
            }
        }

        if self.next_id != self.records.len() as EscrowId {
            return Err(LedgerError::corrupt(format!(
                "allocator at {} but table holds {} records",
                self.next_id,
                self.records.len()
            )));
        }

        let pending = self
            .pending_total()
            .ok_or_else(|| LedgerError::corrupt("pending total overflows"))?;
        if pending != self.custody_balance {
            return Err(LedgerError::corrupt(format!(
                "custody balance {} does not match pending total {}",
                self.custody_balance, pending
            )));
        }

        Ok(())
    }
}
