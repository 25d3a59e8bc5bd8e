//! Configuration management for the escrow ledger
//!
//! Layers, lowest priority first: built-in defaults, an optional TOML file,
//! then `ESCROW_*` environment variables (`ESCROW_DATA_DIR`,
//! `ESCROW_PERSIST`, ...).

use crate::{
    events::EventPublisherConfig,
    funds::LocalBankConfig,
    models::AccountId,
    LedgerResult,
};
use ::config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Snapshot file name inside the data directory
pub const LEDGER_FILE: &str = "ledger.json";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Directory holding the ledger snapshot
    pub data_dir: PathBuf,
    /// Persist state to `data_dir`; `false` keeps everything in memory
    pub persist: bool,
    /// Account that holds custodied funds
    pub custody_account: String,
    /// Broadcast buffer size per event subscriber
    pub event_channel_capacity: usize,
    /// `tracing` filter directive
    pub log_filter: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".escrow"),
            persist: true,
            custody_account: "escrow-ledger".to_string(),
            event_channel_capacity: 256,
            log_filter: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from defaults, `file` (if given) and the environment
    pub fn load(file: Option<&Path>) -> LedgerResult<Self> {
        let mut builder = Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(Environment::with_prefix("ESCROW").try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> LedgerResult<()> {
        if self.custody_account.trim().is_empty() {
            return Err(crate::error::LedgerError::config(
                "custody_account cannot be empty",
            ));
        }

        if self.event_channel_capacity == 0 {
            return Err(crate::error::LedgerError::config(
                "event_channel_capacity must be greater than 0",
            ));
        }

        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE)
    }

    pub fn bank_config(&self) -> LocalBankConfig {
        LocalBankConfig {
            custody_account: AccountId::new(self.custody_account.clone()),
        }
    }

    pub fn event_config(&self) -> EventPublisherConfig {
        EventPublisherConfig {
            channel_capacity: self.event_channel_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert!(config.persist);
        assert_eq!(config.ledger_path(), PathBuf::from(".escrow").join("ledger.json"));
        assert_eq!(
            config.bank_config().custody_account,
            AccountId::from("escrow-ledger")
        );
        assert_eq!(config.event_config().channel_capacity, 256);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("escrow.toml");
        std::fs::write(
            &path,
            "data_dir = \"/var/lib/escrow\"\npersist = false\ncustody_account = \"0xVault\"\n",
        )
        .unwrap();

        let config = LedgerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/escrow"));
        assert!(!config.persist);
        assert_eq!(config.custody_account, "0xVault");
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.bank_config().custody_account, AccountId::from("0xVault"));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("escrow.toml");
        std::fs::write(&path, "event_channel_capacity = 0\n").unwrap();

        assert!(matches!(
            LedgerConfig::load(Some(&path)),
            Err(LedgerError::Config(_))
        ));
    }
}
