//! Arbiter-approved escrow ledger
//!
//! This crate implements the custody core of a three-party escrow:
//! - a depositor funds a record naming an arbiter and a beneficiary
//! - only the arbiter may approve, and approval pays the beneficiary once
//! - records, allocator, custody balance and account balances persist as
//!   one snapshot
//! - committed mutations are published as `Created`/`Approved` events

pub mod amount;
pub mod config;
pub mod error;
pub mod events;
pub mod funds;
pub mod ledger;
pub mod models;
pub mod node;
pub mod store;

pub use error::LedgerError;

pub use amount::{format_ether, parse_ether};
pub use self::config::LedgerConfig;
pub use events::{EventPublisher, EventPublisherConfig, LedgerEvent, LedgerEventKind};
pub use funds::{Balances, FundsRail, LocalBank, LocalBankConfig};
pub use ledger::EscrowLedger;
pub use models::{AccountId, Amount, EscrowId, EscrowRecord, EscrowState};
pub use node::{EscrowNode, NodeHealth};
pub use store::{FileStore, LedgerStore, MemoryStore};

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
