//! Ledger snapshot storage
//!
//! Records, allocator counter, custody balance and account balances are
//! written together as a single snapshot, so a reload can never observe one
//! without the others.

use crate::{
    error::LedgerError,
    models::LedgerSnapshot,
    LedgerResult,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Durable home of the ledger state
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load the last committed snapshot, `None` for a fresh ledger
    async fn load(&self) -> LedgerResult<Option<LedgerSnapshot>>;

    /// Replace the committed snapshot
    async fn save(&self, snapshot: &LedgerSnapshot) -> LedgerResult<()>;
}

/// Volatile store for tests and throwaway ledgers
#[derive(Default)]
pub struct MemoryStore {
    snapshot: RwLock<Option<LedgerSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load(&self) -> LedgerResult<Option<LedgerSnapshot>> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> LedgerResult<()> {
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(())
    }
}

/// JSON snapshot on disk, replaced atomically on every save
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LedgerStore for FileStore {
    async fn load(&self) -> LedgerResult<Option<LedgerSnapshot>> {
        if !tokio::fs::try_exists(&self.path).await? {
            info!("No ledger snapshot at {}, starting fresh", self.path.display());
            return Ok(None);
        }

        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            LedgerError::storage(format!("reading {}: {}", self.path.display(), e))
        })?;
        let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes)?;

        info!(
            "Loaded ledger snapshot from {} ({} records)",
            self.path.display(),
            snapshot.records.len()
        );
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> LedgerResult<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomically(&self.path, &bytes).await.map_err(|e| {
            LedgerError::storage(format!("writing {}: {}", self.path.display(), e))
        })?;

        debug!(
            "Saved ledger snapshot (next_id: {}, custody: {})",
            snapshot.next_id, snapshot.custody_balance
        );
        Ok(())
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `path`
async fn write_atomically(path: &Path, bytes: &[u8]) -> LedgerResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EscrowRecord;

    #[tokio::test]
    async fn test_file_store_fresh_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("ledger.json"));

        assert!(store.load().await.unwrap().is_none());

        let mut snapshot = LedgerSnapshot {
            records: vec![EscrowRecord::new(
                0,
                "depositor".into(),
                "arbiter".into(),
                "beneficiary".into(),
                1_000_000_000_000_000_000,
            )],
            next_id: 1,
            custody_balance: 1_000_000_000_000_000_000,
            ..LedgerSnapshot::default()
        };
        snapshot
            .balances
            .credit(&"escrow-ledger".into(), 1_000_000_000_000_000_000)
            .unwrap();
        store.save(&snapshot).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert!(!dir.path().join("nested").join("ledger.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, b"not json").unwrap();

        let result = FileStore::new(path).load().await;
        assert!(matches!(result, Err(LedgerError::Serialization(_))));
    }
}
