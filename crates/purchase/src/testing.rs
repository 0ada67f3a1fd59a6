//! In-memory fakes for unit tests

use crate::backend::{RecordBackend, RecordSnapshot, RecordUpdate};
use crate::chain::ChainClient;
use crate::error::{PurchaseError, Result};
use crate::pending::{PendingTransaction, RecordRef};
use anyhow::anyhow;
use async_trait::async_trait;
use ethereum::{Address, MarketCall, ReceiptInfo, SplitSignature, TxHash, U256};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

pub struct FakeChain {
    pub allowance: Mutex<U256>,
    pub native_balance: Mutex<U256>,
    pub token_balance: Mutex<U256>,
    pub decimals: u8,
    /// When false, `approve` returns a hash but the allowance stays unchanged
    pub approve_grants: AtomicBool,
    pub approval_reverts: AtomicBool,
    pub fail_reads: AtomicBool,
    pub fail_approve: AtomicBool,
    pub fail_send: AtomicBool,
    pub approvals: Mutex<Vec<(Address, Address, U256)>>,
    pub sent: Mutex<Vec<(Address, MarketCall, Option<SplitSignature>, U256)>>,
    pub receipts: Mutex<HashMap<TxHash, ReceiptInfo>>,
    next_hash: AtomicU8,
}

impl FakeChain {
    pub fn new() -> Self {
        Self {
            allowance: Mutex::new(U256::ZERO),
            native_balance: Mutex::new(U256::ZERO),
            token_balance: Mutex::new(U256::ZERO),
            decimals: 6,
            approve_grants: AtomicBool::new(true),
            approval_reverts: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_approve: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            approvals: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            next_hash: AtomicU8::new(1),
        }
    }

    pub fn with_allowance(self, amount: u64) -> Self {
        *self.allowance.lock() = U256::from(amount);
        self
    }

    fn next_hash(&self) -> TxHash {
        TxHash::with_last_byte(self.next_hash.fetch_add(1, Ordering::SeqCst))
    }

    fn check_reads(&self) -> anyhow::Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }

    pub fn set_receipt(&self, tx_hash: TxHash, success: bool, confirmations: u64) {
        self.receipts.lock().insert(
            tx_hash,
            ReceiptInfo {
                success,
                block_number: Some(100),
                confirmations,
            },
        );
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn native_balance(&self, _owner: Address) -> anyhow::Result<U256> {
        self.check_reads()?;
        Ok(*self.native_balance.lock())
    }

    async fn token_balance(&self, _token: Address, _owner: Address) -> anyhow::Result<U256> {
        self.check_reads()?;
        Ok(*self.token_balance.lock())
    }

    async fn token_decimals(&self, _token: Address) -> anyhow::Result<u8> {
        self.check_reads()?;
        Ok(self.decimals)
    }

    async fn allowance(&self, _token: Address, _owner: Address, _spender: Address) -> anyhow::Result<U256> {
        self.check_reads()?;
        Ok(*self.allowance.lock())
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> anyhow::Result<TxHash> {
        if self.fail_approve.load(Ordering::SeqCst) {
            return Err(anyhow!("user rejected the request"));
        }
        self.approvals.lock().push((token, spender, amount));
        if self.approve_grants.load(Ordering::SeqCst) {
            *self.allowance.lock() = amount;
        }
        let tx_hash = self.next_hash();
        self.set_receipt(tx_hash, !self.approval_reverts.load(Ordering::SeqCst), 1);
        Ok(tx_hash)
    }

    async fn send_market_call(
        &self,
        contract: Address,
        call: &MarketCall,
        signature: Option<&SplitSignature>,
        value: U256,
    ) -> anyhow::Result<TxHash> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(anyhow!("insufficient funds for gas"));
        }
        self.sent
            .lock()
            .push((contract, call.clone(), signature.copied(), value));
        Ok(self.next_hash())
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> anyhow::Result<Option<ReceiptInfo>> {
        self.check_reads()?;
        Ok(self.receipts.lock().get(&tx_hash).copied())
    }
}

/// Backend whose status answers follow a per-record script
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<RecordRef, VecDeque<String>>>,
    current: Mutex<HashMap<RecordRef, String>>,
    missing: Mutex<HashSet<RecordRef>>,
    pub updates: Mutex<Vec<(RecordRef, RecordUpdate)>>,
    pub created: Mutex<Vec<PendingTransaction>>,
    pub gets: AtomicUsize,
    pub fail_gets: AtomicBool,
    pub fail_updates: AtomicBool,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    delay: Duration,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Every `get_record` takes `delay` to answer
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            current: Mutex::new(HashMap::new()),
            missing: Mutex::new(HashSet::new()),
            updates: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            gets: AtomicUsize::new(0),
            fail_gets: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay,
        }
    }

    /// Statuses returned by successive reads; the last one sticks
    pub fn script(&self, record: &RecordRef, statuses: &[&str]) {
        self.scripts
            .lock()
            .insert(record.clone(), statuses.iter().map(|s| s.to_string()).collect());
    }

    /// Updates of this record fail with `RecordNotFound` until it is created
    pub fn mark_missing(&self, record: &RecordRef) {
        self.missing.lock().insert(record.clone());
    }

    pub fn status_of(&self, record: &RecordRef) -> Option<String> {
        self.current.lock().get(record).cloned()
    }
}

#[async_trait]
impl RecordBackend for ScriptedBackend {
    async fn get_record(&self, record: &RecordRef) -> Result<RecordSnapshot> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.gets.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(PurchaseError::Backend("503 Service Unavailable".to_string()));
        }

        if let Some(next) = self.scripts.lock().get_mut(record).and_then(|q| q.pop_front()) {
            self.current.lock().insert(record.clone(), next);
        }
        Ok(RecordSnapshot {
            id: record.id.clone(),
            status: self.current.lock().get(record).cloned(),
            transaction_hash: None,
        })
    }

    async fn update_record(&self, record: &RecordRef, update: &RecordUpdate) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(PurchaseError::Backend("500 Internal Server Error".to_string()));
        }
        if self.missing.lock().contains(record) {
            return Err(PurchaseError::RecordNotFound(record.clone()));
        }
        if let Some(status) = update.status {
            self.current.lock().insert(record.clone(), status.to_string());
        }
        self.updates.lock().push((record.clone(), update.clone()));
        Ok(())
    }

    async fn create_record(&self, pending: &PendingTransaction) -> Result<RecordSnapshot> {
        self.missing.lock().remove(&pending.record);
        self.current
            .lock()
            .insert(pending.record.clone(), pending.status.to_string());
        self.created.lock().push(pending.clone());
        Ok(RecordSnapshot {
            id: pending.record.id.clone(),
            status: Some(pending.status.to_string()),
            transaction_hash: Some(pending.transaction_hash.clone()),
        })
    }
}
