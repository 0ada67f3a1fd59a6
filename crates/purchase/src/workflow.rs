//! One purchase attempt, from allowance check to confirmed transaction
//!
//! Each run owns its `StateTracker` and the record lock. Steps run strictly in
//! sequence; the allowance and confirmation waits can be interrupted through
//! the cancel channel, submission cannot.

use crate::allowance::AllowanceGate;
use crate::chain::format_tx_hash;
use crate::error::{PurchaseError, Result};
use crate::key_lock::KeyLockGuard;
use crate::pending::{PendingTransaction, RecordRef};
use crate::poller::ConfirmationPoller;
use crate::refresh::ViewRefresher;
use crate::state::{StateTracker, Step};
use crate::submitter::TransactionSubmitter;
use anyhow::anyhow;
use ethereum::{Address, MarketCall, U256};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

/// Everything needed to buy one ticket or accept one offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub record: RecordRef,
    pub buyer: Address,
    pub market_contract: Address,
    /// ERC20 used for payment, `None` pays in the native currency
    pub payment_token: Option<Address>,
    pub call: MarketCall,
    /// Hex encoded seller signature, required for offer acceptance
    pub seller_signature: Option<String>,
}

impl PurchaseRequest {
    pub fn price(&self) -> U256 {
        self.call.price()
    }

    /// Value attached to the market call
    pub fn value(&self) -> U256 {
        match self.payment_token {
            Some(_) => U256::ZERO,
            None => self.price(),
        }
    }
}

/// Collaborators shared by every run
#[derive(Clone)]
pub struct WorkflowContext {
    pub allowance: Arc<AllowanceGate>,
    pub submitter: TransactionSubmitter,
    pub poller: ConfirmationPoller,
    pub refresher: Arc<dyn ViewRefresher>,
    pub error_display: Duration,
}

#[derive(Debug, Clone)]
pub enum RunMode {
    Purchase(PurchaseRequest),
    /// Continue watching a transaction submitted before a restart
    Resume(PendingTransaction),
}

impl RunMode {
    pub fn record(&self) -> &RecordRef {
        match self {
            Self::Purchase(request) => &request.record,
            Self::Resume(pending) => &pending.record,
        }
    }
}

pub struct PurchaseWorkflow {
    ctx: WorkflowContext,
    tracker: StateTracker,
    cancel: watch::Receiver<bool>,
    _record_guard: KeyLockGuard<RecordRef>,
}

impl PurchaseWorkflow {
    pub fn new(
        ctx: WorkflowContext,
        tracker: StateTracker,
        cancel: watch::Receiver<bool>,
        record_guard: KeyLockGuard<RecordRef>,
    ) -> Self {
        Self {
            ctx,
            tracker,
            cancel,
            _record_guard: record_guard,
        }
    }

    /// Drive the run to `Done` or `Error`; the record lock is released when this returns
    pub async fn run(mut self, mode: RunMode) -> Result<()> {
        let record = mode.record().clone();
        let result = match &mode {
            RunMode::Purchase(request) => self.purchase(request).await,
            RunMode::Resume(pending) => self.confirm(pending).await,
        };

        match &result {
            Ok(()) => {
                info!("🎉 Purchase of {} completed", record);
                if let Err(e) = self.ctx.refresher.refresh(&record).await {
                    warn!("Failed to refresh {} after purchase: {}", record, e);
                }
            }
            Err(PurchaseError::Cancelled) => {
                info!("Purchase of {} cancelled", record);
                self.tracker.reset();
            }
            Err(e) => {
                error!("Purchase of {} failed: {}", record, e);
                self.tracker.fail(e.user_message());
                self.tracker.schedule_reset(self.ctx.error_display);
            }
        }
        result
    }

    async fn purchase(&mut self, request: &PurchaseRequest) -> Result<()> {
        self.tracker.advance(Step::AwaitingAllowance)?;
        if let Some(token) = request.payment_token {
            until_cancelled(
                &mut self.cancel,
                approve_if_needed(&self.ctx.allowance, request, token),
            )
            .await?;
        }

        self.tracker.advance(Step::AwaitingSubmission)?;
        if *self.cancel.borrow() {
            return Err(PurchaseError::Cancelled);
        }
        let pending = self
            .ctx
            .submitter
            .submit(
                &request.record,
                request.market_contract,
                &request.call,
                request.seller_signature.as_deref(),
                request.value(),
            )
            .await?;

        self.confirm(&pending).await
    }

    async fn confirm(&mut self, pending: &PendingTransaction) -> Result<()> {
        self.tracker.set_transaction_hash(&pending.transaction_hash);
        self.tracker.advance(Step::AwaitingConfirmation)?;

        let (tx, mut rx) = oneshot::channel();
        let handle = self.ctx.poller.watch(
            pending.record.clone(),
            pending.transaction_hash.clone(),
            move |outcome| {
                let _ = tx.send(outcome);
            },
        )?;

        let outcome = tokio::select! {
            outcome = &mut rx => outcome,
            _ = cancelled(&mut self.cancel) => {
                if handle.cancel() {
                    return Err(PurchaseError::Cancelled);
                }
                // Outcome was delivered before the cancel arrived
                rx.await
            }
        };
        let outcome =
            outcome.map_err(|_| PurchaseError::Other(anyhow!("confirmation watch ended without an outcome")))?;

        outcome.into_result(&pending.transaction_hash)?;
        self.tracker.advance(Step::Done)?;
        Ok(())
    }
}

async fn approve_if_needed(gate: &AllowanceGate, request: &PurchaseRequest, token: Address) -> Result<()> {
    let required = request.price();
    let outcome = gate
        .ensure_allowance(token, request.buyer, request.market_contract, required)
        .await?;

    let Some(tx_hash) = outcome.tx_hash else {
        return Ok(());
    };

    gate.wait_for_approval(tx_hash).await.map_err(|e| match e {
        PurchaseError::ApprovalFailed(_) => e,
        other => PurchaseError::ApprovalFailed(other.to_string()),
    })?;

    let snapshot = gate
        .check_allowance(token, request.buyer, request.market_contract)
        .await
        .map_err(|e| PurchaseError::ApprovalFailed(e.to_string()))?;
    if snapshot.amount < required {
        return Err(PurchaseError::ApprovalFailed(format!(
            "allowance {} still below {} after approval {}",
            snapshot.amount,
            required,
            format_tx_hash(&tx_hash)
        )));
    }
    Ok(())
}

async fn until_cancelled<T>(
    cancel: &mut watch::Receiver<bool>,
    step: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        result = step => result,
        _ = cancelled(cancel) => Err(PurchaseError::Cancelled),
    }
}

/// Resolves once cancellation is requested; never if the sender is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowance::ApprovalPolicy;
    use crate::key_lock::KeyLockManager;
    use crate::pending::RecordKind;
    use crate::poller::PollerConfig;
    use crate::refresh::BackendRefresher;
    use crate::store::{MemoryStore, PendingTxStore};
    use crate::testing::{FakeChain, ScriptedBackend};
    use std::sync::atomic::Ordering;

    const TOKEN: Address = Address::repeat_byte(0x11);
    const BUYER: Address = Address::repeat_byte(0x22);
    const MARKET: Address = Address::repeat_byte(0x33);

    struct Fixture {
        chain: Arc<FakeChain>,
        backend: Arc<ScriptedBackend>,
        ctx: WorkflowContext,
        locks: KeyLockManager<RecordRef>,
    }

    fn fixture(chain: FakeChain) -> Fixture {
        let chain = Arc::new(chain);
        let backend = Arc::new(ScriptedBackend::new());
        let store = PendingTxStore::new(Arc::new(MemoryStore::new()));
        let config = PollerConfig {
            reconcile_receipts: false,
            ..PollerConfig::default()
        };
        let ctx = WorkflowContext {
            allowance: Arc::new(AllowanceGate::new(chain.clone(), ApprovalPolicy::Unlimited)),
            submitter: TransactionSubmitter::new(chain.clone(), backend.clone(), store.clone()),
            poller: ConfirmationPoller::new(backend.clone(), store, config),
            refresher: Arc::new(BackendRefresher::new(backend.clone())),
            error_display: Duration::from_secs(5),
        };
        Fixture {
            chain,
            backend,
            ctx,
            locks: KeyLockManager::new(Duration::from_secs(3600)),
        }
    }

    fn request(token: Option<Address>) -> PurchaseRequest {
        PurchaseRequest {
            record: RecordRef::new(RecordKind::Ticket, "R1"),
            buyer: BUYER,
            market_contract: MARKET,
            payment_token: token,
            call: MarketCall::JoinChannel {
                channel_id: U256::from(1),
                price: U256::from(100),
            },
            seller_signature: None,
        }
    }

    fn workflow(f: &Fixture) -> (PurchaseWorkflow, StateTracker, watch::Sender<bool>) {
        let (tracker, _rx) = StateTracker::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let guard = f
            .locks
            .try_lock(RecordRef::new(RecordKind::Ticket, "R1"))
            .unwrap();
        let workflow = PurchaseWorkflow::new(f.ctx.clone(), tracker.clone(), cancel_rx, guard);
        (workflow, tracker, cancel_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_purchase_approves_then_submits() {
        let f = fixture(FakeChain::new());
        f.backend.script(&request(None).record, &["PENDING", "CONFIRMED"]);
        let (workflow, tracker, _cancel) = workflow(&f);

        workflow.run(RunMode::Purchase(request(Some(TOKEN)))).await.unwrap();

        assert_eq!(tracker.current().step, Step::Done);
        assert_eq!(f.chain.approvals.lock().len(), 1);
        let sent = f.chain.sent.lock();
        assert_eq!(sent.len(), 1);
        // Token payments attach no value
        assert_eq!(sent[0].3, U256::ZERO);
        assert!(!f.locks.is_locked(&request(None).record));
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_purchase_skips_allowance() {
        let f = fixture(FakeChain::new());
        f.backend.script(&request(None).record, &["CONFIRMED"]);
        let (workflow, tracker, _cancel) = workflow(&f);

        workflow.run(RunMode::Purchase(request(None))).await.unwrap();

        assert_eq!(tracker.current().step, Step::Done);
        assert!(f.chain.approvals.lock().is_empty());
        assert_eq!(f.chain.sent.lock()[0].3, U256::from(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_approval_not_granted_fails() {
        let chain = FakeChain::new();
        chain.approve_grants.store(false, Ordering::SeqCst);
        let f = fixture(chain);
        let (workflow, tracker, _cancel) = workflow(&f);

        let err = workflow
            .run(RunMode::Purchase(request(Some(TOKEN))))
            .await
            .unwrap_err();
        assert!(matches!(err, PurchaseError::ApprovalFailed(_)));
        assert_eq!(tracker.current().step, Step::Error);
        assert!(f.chain.sent.lock().is_empty());

        // The error is dismissed after the display delay
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(tracker.current().step, Step::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_confirmation() {
        let f = fixture(FakeChain::new());
        let (workflow, tracker, cancel) = workflow(&f);
        let mut rx = tracker.subscribe();

        let run = tokio::spawn(workflow.run(RunMode::Purchase(request(None))));
        rx.wait_for(|s| s.step == Step::AwaitingConfirmation).await.unwrap();
        cancel.send(true).unwrap();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, PurchaseError::Cancelled));
        assert_eq!(tracker.current().step, Step::Idle);
        assert!(!f.locks.is_locked(&request(None).record));
    }
}
