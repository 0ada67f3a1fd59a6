//! Local durable key-value storage
//!
//! Holds the last submitted transaction so confirmation tracking survives a restart.

use crate::constants::PENDING_TX_KEY;
use crate::error::{PurchaseError, Result};
use crate::pending::{PendingTransaction, RecordRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove `key` only while it still holds `expected`, as one atomic step
    async fn remove_if_eq(&self, key: &str, expected: &str) -> Result<bool>;
}

/// In-process store, nothing survives a restart
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn remove_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let mut entries = self.entries.lock();
        if entries.get(key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        entries.remove(key);
        Ok(true)
    }
}

/// JSON object on disk; writes go through a temp file and rename
pub struct FileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<HashMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) if data.trim().is_empty() => Ok(HashMap::new()),
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(PurchaseError::Storage(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn write_all(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(entries)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _lock = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _lock = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        if entries.remove(key).is_some() {
            self.write_all(&entries).await?;
        }
        Ok(())
    }

    async fn remove_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let _lock = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        if entries.get(key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        entries.remove(key);
        self.write_all(&entries).await?;
        Ok(true)
    }
}

/// The most recent unconfirmed transaction, as persisted locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTransaction {
    pub record: RecordRef,
    pub transaction_hash: String,
    pub submitted_at: DateTime<Utc>,
}

impl From<&PendingTransaction> for StoredTransaction {
    fn from(pending: &PendingTransaction) -> Self {
        Self {
            record: pending.record.clone(),
            transaction_hash: pending.transaction_hash.clone(),
            submitted_at: pending.submitted_at,
        }
    }
}

impl StoredTransaction {
    pub fn into_pending(self) -> PendingTransaction {
        PendingTransaction {
            submitted_at: self.submitted_at,
            ..PendingTransaction::new(self.record, self.transaction_hash)
        }
    }
}

/// Typed access to the single pending-transaction key
#[derive(Clone)]
pub struct PendingTxStore {
    store: Arc<dyn KeyValueStore>,
}

impl PendingTxStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn save(&self, pending: &PendingTransaction) -> Result<()> {
        let value = serde_json::to_string(&StoredTransaction::from(pending))?;
        self.store.set(PENDING_TX_KEY, &value).await?;
        debug!("Stored pending transaction {} for {}", pending.transaction_hash, pending.record);
        Ok(())
    }

    pub async fn load(&self) -> Result<Option<StoredTransaction>> {
        match self.store.get(PENDING_TX_KEY).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Clear the key only if it still refers to `tx_hash`; a newer submission is kept,
    /// even one saved between the read and the removal
    pub async fn clear_if_matches(&self, tx_hash: &str) -> Result<bool> {
        let Some(raw) = self.store.get(PENDING_TX_KEY).await? else {
            return Ok(false);
        };
        let stored: StoredTransaction = serde_json::from_str(&raw)?;
        if !stored.transaction_hash.eq_ignore_ascii_case(tx_hash) {
            return Ok(false);
        }

        let cleared = self.store.remove_if_eq(PENDING_TX_KEY, &raw).await?;
        if cleared {
            debug!("Cleared stored transaction {}", tx_hash);
        } else {
            debug!("Stored transaction changed while clearing {}, kept", tx_hash);
        }
        Ok(cleared)
    }
}
