use crate::allowance::AllowanceGate;
use crate::backend::{HttpRecordBackend, RecordBackend};
use crate::chain::ChainClient;
use crate::config::{PurchaseConfig, WorkflowSettings};
use crate::error::{PurchaseError, Result};
use crate::key_lock::KeyLockManager;
use crate::pending::{RecordRef, TransactionStatus};
use crate::poller::ConfirmationPoller;
use crate::refresh::{BackendRefresher, ViewRefresher};
use crate::state::{StateTracker, WorkflowState};
use crate::store::{FileStore, KeyValueStore, PendingTxStore};
use crate::submitter::TransactionSubmitter;
use crate::workflow::{PurchaseRequest, PurchaseWorkflow, RunMode, WorkflowContext};
use anyhow::anyhow;
use ethereum::{ClientConfig, EthereumNetwork, MarketplaceClient, resolve_rpc_url};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct RunEntry {
    state: watch::Receiver<WorkflowState>,
    cancel: watch::Sender<bool>,
}

/// A started purchase run
pub struct PurchaseHandle {
    pub record: RecordRef,
    state: watch::Receiver<WorkflowState>,
    task: JoinHandle<Result<()>>,
}

impl PurchaseHandle {
    pub fn state(&self) -> watch::Receiver<WorkflowState> {
        self.state.clone()
    }

    /// Wait for the run to reach `Done` or `Error`
    pub async fn wait(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| PurchaseError::Other(anyhow!("Purchase task for {} failed: {}", self.record, e)))?
    }
}

/// Entry point for the UI layer: start, cancel and observe purchases
pub struct PurchaseService {
    ctx: WorkflowContext,
    backend: Arc<dyn RecordBackend>,
    record_locks: KeyLockManager<RecordRef>,
    runs: RwLock<HashMap<RecordRef, RunEntry>>,
    pending_store: PendingTxStore,
}

impl PurchaseService {
    /// `record_lock_timeout` must outlive the longest run, see `WorkflowSettings::record_lock_timeout`
    pub fn new(
        ctx: WorkflowContext,
        backend: Arc<dyn RecordBackend>,
        pending_store: PendingTxStore,
        record_lock_timeout: Duration,
    ) -> Self {
        Self {
            ctx,
            backend,
            record_locks: KeyLockManager::new(record_lock_timeout),
            runs: RwLock::new(HashMap::new()),
            pending_store,
        }
    }

    /// Wire the workflow over the given collaborators
    pub fn with_collaborators(
        chain: Arc<dyn ChainClient>,
        backend: Arc<dyn RecordBackend>,
        store: Arc<dyn KeyValueStore>,
        settings: &WorkflowSettings,
    ) -> Self {
        let pending_store = PendingTxStore::new(store);
        let allowance = AllowanceGate::new(chain.clone(), settings.approval_policy).with_polling(
            settings.poll_interval,
            settings.approval_wait(),
            settings.min_confirmations,
        );
        let submitter = TransactionSubmitter::new(chain.clone(), backend.clone(), pending_store.clone());
        let poller = ConfirmationPoller::new(backend.clone(), pending_store.clone(), settings.poller_config())
            .with_chain(chain);
        let refresher: Arc<dyn ViewRefresher> = Arc::new(BackendRefresher::new(backend.clone()));

        let ctx = WorkflowContext {
            allowance: Arc::new(allowance),
            submitter,
            poller,
            refresher,
            error_display: settings.error_display,
        };
        Self::new(ctx, backend, pending_store, settings.record_lock_timeout())
    }

    /// Connect to the configured chain, backend and local store
    pub fn connect(config: &PurchaseConfig) -> Result<Self> {
        let network = EthereumNetwork::get_network(&config.network)
            .ok_or_else(|| PurchaseError::InvalidEnvVar {
                var: "MARKETPLACE_NETWORK".to_string(),
                reason: format!("unsupported network {}", config.network),
            })?;
        let rpc_url = resolve_rpc_url(config.rpc_url.clone(), &config.network)?;

        let client = MarketplaceClient::new(ClientConfig {
            rpc_url,
            chain_id: network.chain_id,
            private_key: config.private_key.clone(),
        })?;
        let backend = HttpRecordBackend::new(config.backend_url.clone(), config.backend_token.clone())?;
        let store = FileStore::new(&config.store_path);

        info!(
            "Purchase service on {} (chain {}), backend {}, store {}",
            network.name,
            network.chain_id,
            config.backend_url,
            config.store_path.display()
        );
        Ok(Self::with_collaborators(
            Arc::new(client),
            Arc::new(backend),
            Arc::new(store),
            &config.workflow,
        ))
    }

    /// Start a purchase; rejected without side effects while another run holds the record
    /// or an earlier transaction for it is still pending
    pub async fn start_purchase(&self, request: PurchaseRequest) -> Result<PurchaseHandle> {
        self.start(RunMode::Purchase(request)).await
    }

    /// Re-attach confirmation tracking to a transaction stored before a restart
    pub async fn resume_pending(&self) -> Result<Option<PurchaseHandle>> {
        let Some(stored) = self.pending_store.load().await? else {
            debug!("No stored transaction to resume");
            return Ok(None);
        };

        info!(
            "🔄 Resuming {} for {} submitted at {}",
            stored.transaction_hash, stored.record, stored.submitted_at
        );
        self.start(RunMode::Resume(stored.into_pending())).await.map(Some)
    }

    async fn start(&self, mode: RunMode) -> Result<PurchaseHandle> {
        let record = mode.record().clone();
        let guard = self
            .record_locks
            .try_lock(record.clone())
            .ok_or_else(|| PurchaseError::AlreadyInProgress { record: record.clone() })?;
        if let RunMode::Purchase(_) = &mode {
            self.ensure_nothing_pending(&record).await?;
        }

        let (tracker, state) = StateTracker::new();
        let (cancel, cancel_rx) = watch::channel(false);
        self.runs.write().await.insert(
            record.clone(),
            RunEntry {
                state: state.clone(),
                cancel,
            },
        );

        let workflow = PurchaseWorkflow::new(self.ctx.clone(), tracker, cancel_rx, guard);
        let task = tokio::spawn(workflow.run(mode));

        Ok(PurchaseHandle { record, state, task })
    }

    // A cancelled or timed out run leaves its transaction in flight; buying again
    // would send a second payment and overwrite the hash kept for resume
    async fn ensure_nothing_pending(&self, record: &RecordRef) -> Result<()> {
        let snapshot = match self.backend.get_record(record).await {
            Ok(snapshot) => Some(snapshot),
            Err(PurchaseError::RecordNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let backend_status = snapshot.as_ref().map(|s| s.transaction_status());

        if let Some(snapshot) = &snapshot {
            if let (Some(TransactionStatus::Pending), Some(hash)) = (backend_status, &snapshot.transaction_hash) {
                warn!("{} still has pending transaction {} in the backend", record, hash);
                return Err(PurchaseError::AlreadyInProgress { record: record.clone() });
            }
        }

        let stored = match self.pending_store.load().await? {
            Some(stored) if stored.record == *record => stored,
            _ => return Ok(()),
        };
        match backend_status {
            Some(status) if status.is_terminal() => {
                // Settled while nobody was watching
                info!("Stored transaction {} for {} ended {}", stored.transaction_hash, record, status);
                self.pending_store.clear_if_matches(&stored.transaction_hash).await?;
                Ok(())
            }
            _ => {
                warn!(
                    "{} still has pending transaction {} submitted at {}, resume it instead",
                    record, stored.transaction_hash, stored.submitted_at
                );
                Err(PurchaseError::AlreadyInProgress { record: record.clone() })
            }
        }
    }

    /// Cancel the active run for `record`; false when nothing was running
    pub async fn cancel_purchase(&self, record: &RecordRef) -> bool {
        let runs = self.runs.read().await;
        match runs.get(record) {
            Some(entry) if !entry.state.borrow().step.is_settled() => {
                info!("Cancelling purchase of {}", record);
                entry.cancel.send(true).is_ok()
            }
            _ => false,
        }
    }

    /// Latest state of the most recent run for `record`
    pub async fn state(&self, record: &RecordRef) -> Option<WorkflowState> {
        self.runs
            .read()
            .await
            .get(record)
            .map(|entry| entry.state.borrow().clone())
    }

    pub async fn subscribe(&self, record: &RecordRef) -> Option<watch::Receiver<WorkflowState>> {
        self.runs.read().await.get(record).map(|entry| entry.state.clone())
    }

    pub fn is_running(&self, record: &RecordRef) -> bool {
        self.record_locks.is_locked(record)
    }
}
