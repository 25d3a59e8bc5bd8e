//! Error types for the escrow ledger
//!
//! The first four variants are the domain taxonomy every caller can match
//! on. The rest cover persistence, configuration and input parsing.

use crate::models::{AccountId, EscrowId};
use thiserror::Error;

/// Main error type for ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    /// No record exists with this id
    #[error("invalid ID: no escrow record {0}")]
    InvalidId(EscrowId),

    /// Caller is not the arbiter of the record
    #[error("you are not the arbiter of escrow {id} (caller: {caller})")]
    Unauthorized { id: EscrowId, caller: AccountId },

    /// Record was approved before
    #[error("escrow {0} has already been approved")]
    AlreadyApproved(EscrowId),

    /// Deposit or payout could not be moved
    #[error("transfer failed: {0}")]
    TransferFailure(String),

    /// Snapshot could not be written or read
    #[error("storage error: {0}")]
    Storage(String),

    /// Persisted state violates a ledger invariant
    #[error("corrupt ledger state: {0}")]
    CorruptState(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Amount string could not be parsed or is out of range
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// Create a transfer failure
    pub fn transfer<S: Into<String>>(msg: S) -> Self {
        Self::TransferFailure(msg.into())
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a corrupt state error
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        Self::CorruptState(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid amount error
    pub fn invalid_amount<S: Into<String>>(msg: S) -> Self {
        Self::InvalidAmount(msg.into())
    }
}

impl From<::config::ConfigError> for LedgerError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
