//! Confirmation tracking for submitted transactions
//!
//! A watch polls the backend record until its status leaves PENDING. Each
//! `(record, transaction hash)` pair has at most one active watch, guarded
//! by a `KeyLockManager`. The next poll is scheduled only after the previous
//! one resolved, so slow backend answers never stack up.
//!
//! The terminal callback runs at most once. Delivery and cancellation race
//! on a single atomic; whichever wins decides whether the callback runs.

use crate::backend::{RecordBackend, RecordUpdate};
use crate::chain::ChainClient;
use crate::constants::{CONFIRMATION_POLL_INTERVAL_SECS, CONFIRMATION_TIMEOUT_SECS, MIN_CONFIRMATIONS};
use crate::error::{PurchaseError, Result};
use crate::key_lock::{KeyLockGuard, KeyLockManager};
use crate::pending::{RecordRef, TransactionStatus};
use crate::store::PendingTxStore;
use ethereum::TxHash;
use parking_lot::Mutex;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

const ACTIVE: u8 = 0;
const DELIVERED: u8 = 1;
const CANCELLED: u8 = 2;

type WatchKey = (RecordRef, String);

/// How a watch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Confirmed,
    Failed { reason: String },
    TimedOut { waited: Duration },
}

impl PollOutcome {
    pub fn into_result(self, tx_hash: &str) -> Result<()> {
        match self {
            Self::Confirmed => Ok(()),
            Self::Failed { reason } => Err(PurchaseError::TransactionFailed {
                tx_hash: tx_hash.to_string(),
                reason,
            }),
            Self::TimedOut { waited } => Err(PurchaseError::Timeout {
                tx_hash: tx_hash.to_string(),
                seconds: waited.as_secs(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// `None` polls until a terminal status or cancellation
    pub max_wait: Option<Duration>,
    pub min_confirmations: u64,
    /// Write mined receipts back to the backend while it still reports PENDING
    pub reconcile_receipts: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(CONFIRMATION_POLL_INTERVAL_SECS),
            max_wait: Some(Duration::from_secs(CONFIRMATION_TIMEOUT_SECS)),
            min_confirmations: MIN_CONFIRMATIONS,
            reconcile_receipts: true,
        }
    }
}

struct WatchShared {
    delivery: AtomicU8,
    cancel: Notify,
    guard: Mutex<Option<KeyLockGuard<WatchKey>>>,
}

impl WatchShared {
    fn release(&self) {
        drop(self.guard.lock().take());
    }
}

/// Stops a watch; returned by `ConfirmationPoller::watch`
pub struct CancelHandle {
    shared: Arc<WatchShared>,
    record: RecordRef,
    tx_hash: String,
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("record", &self.record)
            .field("tx_hash", &self.tx_hash)
            .finish_non_exhaustive()
    }
}

impl CancelHandle {
    /// Stop polling and release the watch lock.
    ///
    /// Returns false when the outcome was already delivered or the watch was
    /// cancelled before.
    pub fn cancel(&self) -> bool {
        if self
            .shared
            .delivery
            .compare_exchange(ACTIVE, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Watch of {} for {} already finished", self.tx_hash, self.record);
            return false;
        }

        self.shared.release();
        self.shared.cancel.notify_one();
        info!("🛑 Stopped watching {} for {}", self.tx_hash, self.record);
        true
    }

    pub fn is_active(&self) -> bool {
        self.shared.delivery.load(Ordering::SeqCst) == ACTIVE
    }

    pub fn record(&self) -> &RecordRef {
        &self.record
    }

    pub fn tx_hash(&self) -> &str {
        &self.tx_hash
    }
}

#[derive(Clone)]
pub struct ConfirmationPoller {
    backend: Arc<dyn RecordBackend>,
    chain: Option<Arc<dyn ChainClient>>,
    pending_store: PendingTxStore,
    config: PollerConfig,
    watches: KeyLockManager<WatchKey>,
}

impl ConfirmationPoller {
    pub fn new(backend: Arc<dyn RecordBackend>, pending_store: PendingTxStore, config: PollerConfig) -> Self {
        // Watches end on their own at max_wait; the lock outlives that by a couple of ticks
        let lock_timeout = config
            .max_wait
            .map(|wait| wait + config.poll_interval * 2)
            .unwrap_or(Duration::MAX);

        Self {
            backend,
            chain: None,
            pending_store,
            config,
            watches: KeyLockManager::new(lock_timeout),
        }
    }

    /// Enables receipt reconciliation against `chain`
    pub fn with_chain(mut self, chain: Arc<dyn ChainClient>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn is_watching(&self, record: &RecordRef, tx_hash: &str) -> bool {
        self.watches.is_locked(&watch_key(record, tx_hash))
    }

    /// Start polling `tx_hash` for `record`; `on_terminal` receives the outcome unless cancelled first
    pub fn watch<F>(&self, record: RecordRef, tx_hash: impl Into<String>, on_terminal: F) -> Result<CancelHandle>
    where
        F: FnOnce(PollOutcome) + Send + 'static,
    {
        let tx_hash = tx_hash.into();
        let guard = self
            .watches
            .try_lock(watch_key(&record, &tx_hash))
            .ok_or_else(|| PurchaseError::AlreadyWatching {
                record: record.clone(),
                tx_hash: tx_hash.clone(),
            })?;

        let shared = Arc::new(WatchShared {
            delivery: AtomicU8::new(ACTIVE),
            cancel: Notify::new(),
            guard: Mutex::new(Some(guard)),
        });

        info!(
            "👀 Watching {} for {} every {:?}",
            tx_hash, record, self.config.poll_interval
        );

        let poller = self.clone();
        let task_shared = shared.clone();
        let task_record = record.clone();
        let task_hash = tx_hash.clone();
        tokio::spawn(async move {
            let outcome = poller.poll_until_terminal(&task_record, &task_hash, &task_shared).await;
            poller
                .finish(&task_record, &task_hash, &task_shared, outcome, on_terminal)
                .await;
        });

        Ok(CancelHandle {
            shared,
            record,
            tx_hash,
        })
    }

    async fn poll_until_terminal(&self, record: &RecordRef, tx_hash: &str, shared: &WatchShared) -> Option<PollOutcome> {
        let start = Instant::now();
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = shared.cancel.notified() => return None,
                _ = sleep(self.config.poll_interval) => {}
            }
            if shared.delivery.load(Ordering::SeqCst) != ACTIVE {
                return None;
            }

            ticks += 1;
            match self.check_once(record, tx_hash).await {
                Ok(Some(outcome)) => {
                    debug!("{} for {} resolved after {} polls: {:?}", tx_hash, record, ticks, outcome);
                    return Some(outcome);
                }
                Ok(None) => debug!("{} for {} still pending (poll {})", tx_hash, record, ticks),
                Err(e) => warn!("Poll {} of {} for {} failed: {}", ticks, tx_hash, record, e),
            }

            if let Some(max_wait) = self.config.max_wait {
                let waited = start.elapsed();
                if waited >= max_wait {
                    warn!(
                        "⏰ {} for {} not confirmed after {:?} ({} polls)",
                        tx_hash, record, waited, ticks
                    );
                    return Some(PollOutcome::TimedOut { waited });
                }
            }
        }
    }

    /// One status check; `None` while the record is still pending
    pub async fn check_once(&self, record: &RecordRef, tx_hash: &str) -> Result<Option<PollOutcome>> {
        let snapshot = self.backend.get_record(record).await?;
        match snapshot.transaction_status() {
            TransactionStatus::Confirmed => return Ok(Some(PollOutcome::Confirmed)),
            TransactionStatus::Failed => {
                return Ok(Some(PollOutcome::Failed {
                    reason: format!(
                        "record status is {}",
                        snapshot.status.as_deref().unwrap_or("unknown")
                    ),
                }));
            }
            TransactionStatus::Pending => {}
        }

        if let Some(chain) = self.chain.as_ref().filter(|_| self.config.reconcile_receipts) {
            self.reconcile_receipt(chain.as_ref(), record, tx_hash).await;
        }
        Ok(None)
    }

    // The backend stays the source of truth; the next poll observes what is written here
    async fn reconcile_receipt(&self, chain: &dyn ChainClient, record: &RecordRef, tx_hash: &str) {
        let hash = match TxHash::from_str(tx_hash) {
            Ok(hash) => hash,
            Err(e) => {
                debug!("Not reconciling {}: {}", tx_hash, e);
                return;
            }
        };

        let status = match chain.transaction_receipt(hash).await {
            Ok(Some(receipt)) if !receipt.success => TransactionStatus::Failed,
            Ok(Some(receipt)) if receipt.confirmations >= self.config.min_confirmations => {
                TransactionStatus::Confirmed
            }
            Ok(_) => return,
            Err(e) => {
                warn!("Failed to read receipt of {}: {}", tx_hash, e);
                return;
            }
        };

        info!("Receipt of {} is {}, updating {}", tx_hash, status, record);
        if let Err(e) = self
            .backend
            .update_record(record, &RecordUpdate::status(status))
            .await
        {
            warn!("Failed to write {} status for {}: {}", status, record, e);
        }
    }

    async fn finish<F>(
        &self,
        record: &RecordRef,
        tx_hash: &str,
        shared: &WatchShared,
        outcome: Option<PollOutcome>,
        on_terminal: F,
    ) where
        F: FnOnce(PollOutcome),
    {
        let Some(outcome) = outcome else {
            debug!("Watch of {} for {} cancelled", tx_hash, record);
            return;
        };

        // A timed out transaction stays stored so it can be resumed later
        if !matches!(outcome, PollOutcome::TimedOut { .. }) {
            if let Err(e) = self.pending_store.clear_if_matches(tx_hash).await {
                warn!("Failed to clear stored transaction {}: {}", tx_hash, e);
            }
        }

        shared.release();

        if shared
            .delivery
            .compare_exchange(ACTIVE, DELIVERED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            match &outcome {
                PollOutcome::Confirmed => info!("✅ {} confirmed for {}", tx_hash, record),
                other => warn!("❌ {} for {} ended: {:?}", tx_hash, record, other),
            }
            on_terminal(outcome);
        } else {
            debug!("Watch of {} for {} cancelled before delivery", tx_hash, record);
        }
    }
}

fn watch_key(record: &RecordRef, tx_hash: &str) -> WatchKey {
    (record.clone(), tx_hash.to_lowercase())
}
