use crate::backend::{RecordBackend, RecordUpdate};
use crate::chain::{ChainClient, format_tx_hash};
use crate::error::{PurchaseError, Result};
use crate::pending::{PendingTransaction, RecordRef};
use crate::store::PendingTxStore;
use ethereum::{Address, MarketCall, U256, split_signature};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sends marketplace calls and records them as pending
#[derive(Clone)]
pub struct TransactionSubmitter {
    chain: Arc<dyn ChainClient>,
    backend: Arc<dyn RecordBackend>,
    pending_store: PendingTxStore,
}

impl TransactionSubmitter {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        backend: Arc<dyn RecordBackend>,
        pending_store: PendingTxStore,
    ) -> Self {
        Self {
            chain,
            backend,
            pending_store,
        }
    }

    /// Send `call` to `contract` for `record`.
    ///
    /// Once the node accepted the transaction it is recorded as PENDING in the
    /// backend and in local storage. Failing to record it is only logged: the
    /// hash is already broadcast and polling must still start.
    pub async fn submit(
        &self,
        record: &RecordRef,
        contract: Address,
        call: &MarketCall,
        signature: Option<&str>,
        value: U256,
    ) -> Result<PendingTransaction> {
        let signature = match (call.requires_signature(), signature) {
            (true, Some(raw)) => Some(
                split_signature(raw).map_err(|e| PurchaseError::InvalidSignature(e.to_string()))?,
            ),
            (true, None) => {
                return Err(PurchaseError::InvalidSignature(format!(
                    "{} requires a seller signature",
                    call.method_name()
                )));
            }
            (false, _) => None,
        };

        debug!("Submitting {} for {} with value {}", call, record, value);
        let tx_hash = self
            .chain
            .send_market_call(contract, call, signature.as_ref(), value)
            .await
            .map_err(|e| PurchaseError::SubmissionFailed {
                method: call.method_name().to_string(),
                reason: e.to_string(),
            })?;

        let pending = PendingTransaction::new(record.clone(), format_tx_hash(&tx_hash));
        info!("📤 {} submitted for {}: {}", call.method_name(), record, pending.transaction_hash);

        self.record_pending(&pending).await;
        if let Err(e) = self.pending_store.save(&pending).await {
            warn!("Failed to store pending transaction {} locally: {}", pending.transaction_hash, e);
        }

        Ok(pending)
    }

    async fn record_pending(&self, pending: &PendingTransaction) {
        let update = RecordUpdate::pending(pending.transaction_hash.clone());
        match self.backend.update_record(&pending.record, &update).await {
            Ok(()) => {}
            Err(PurchaseError::RecordNotFound(_)) => {
                debug!("{} not in backend yet, creating it", pending.record);
                if let Err(e) = self.backend.create_record(pending).await {
                    warn!("Failed to create backend record {}: {}", pending.record, e);
                }
            }
            Err(e) => warn!(
                "Failed to mark {} as pending with {}: {}",
                pending.record, pending.transaction_hash, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::{RecordKind, TransactionStatus};
    use crate::store::MemoryStore;
    use crate::testing::{FakeChain, ScriptedBackend};
    use std::sync::atomic::Ordering;

    const MARKET: Address = Address::repeat_byte(0x33);

    fn signature_hex() -> String {
        format!("0x{}{}1b", "11".repeat(32), "22".repeat(32))
    }

    fn offer() -> MarketCall {
        MarketCall::AcceptTicketOffer {
            offer_id: U256::from(7),
            ticket_id: U256::from(3),
            price: U256::from(100),
        }
    }

    struct Fixture {
        chain: Arc<FakeChain>,
        backend: Arc<ScriptedBackend>,
        store: PendingTxStore,
        submitter: TransactionSubmitter,
    }

    fn fixture() -> Fixture {
        let chain = Arc::new(FakeChain::new());
        let backend = Arc::new(ScriptedBackend::new());
        let store = PendingTxStore::new(Arc::new(MemoryStore::new()));
        let submitter = TransactionSubmitter::new(chain.clone(), backend.clone(), store.clone());
        Fixture {
            chain,
            backend,
            store,
            submitter,
        }
    }

    #[tokio::test]
    async fn test_submit_records_pending() {
        let f = fixture();
        let record = RecordRef::new(RecordKind::TicketOffer, "7");

        let pending = f
            .submitter
            .submit(&record, MARKET, &offer(), Some(&signature_hex()), U256::ZERO)
            .await
            .unwrap();

        let sent = f.chain.sent.lock();
        assert_eq!(sent.len(), 1);
        let sig = sent[0].2.unwrap();
        assert_eq!(sig.v, 27);

        let updates = f.backend.updates.lock();
        assert_eq!(updates[0].0, record);
        assert_eq!(updates[0].1.status, Some(TransactionStatus::Pending));
        assert_eq!(updates[0].1.transaction_hash.as_deref(), Some(pending.transaction_hash.as_str()));

        let stored = f.store.load().await.unwrap().unwrap();
        assert_eq!(stored.transaction_hash, pending.transaction_hash);
    }

    #[tokio::test]
    async fn test_malformed_signature_never_reaches_chain() {
        let f = fixture();
        let record = RecordRef::new(RecordKind::TicketOffer, "7");

        for bad in [None, Some("0x1234"), Some("not hex")] {
            let err = f
                .submitter
                .submit(&record, MARKET, &offer(), bad, U256::ZERO)
                .await
                .unwrap_err();
            assert!(matches!(err, PurchaseError::InvalidSignature(_)));
        }
        assert!(f.chain.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_chain_rejection_is_submission_failure() {
        let f = fixture();
        f.chain.fail_send.store(true, Ordering::SeqCst);
        let call = MarketCall::JoinChannel {
            channel_id: U256::from(1),
            price: U256::from(100),
        };

        let err = f
            .submitter
            .submit(&RecordRef::new(RecordKind::Ticket, "1"), MARKET, &call, None, U256::from(100))
            .await
            .unwrap_err();
        match err {
            PurchaseError::SubmissionFailed { method, .. } => assert_eq!(method, "joinChannel"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(f.store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_record_is_created() {
        let f = fixture();
        let record = RecordRef::new(RecordKind::ChannelOffer, "9");
        f.backend.mark_missing(&record);
        let call = MarketCall::AcceptChannelOffer {
            offer_id: U256::from(9),
            channel_id: U256::from(2),
            price: U256::from(100),
        };

        f.submitter
            .submit(&record, MARKET, &call, Some(&signature_hex()), U256::ZERO)
            .await
            .unwrap();
        assert_eq!(f.backend.created.lock().len(), 1);
        assert_eq!(f.backend.status_of(&record).as_deref(), Some("PENDING"));
    }

    #[tokio::test]
    async fn test_backend_failure_does_not_fail_submission() {
        let f = fixture();
        f.backend.fail_updates.store(true, Ordering::SeqCst);
        let call = MarketCall::JoinChannel {
            channel_id: U256::from(1),
            price: U256::from(100),
        };

        let pending = f
            .submitter
            .submit(&RecordRef::new(RecordKind::Ticket, "1"), MARKET, &call, None, U256::from(100))
            .await
            .unwrap();
        assert_eq!(
            f.store.load().await.unwrap().unwrap().transaction_hash,
            pending.transaction_hash
        );
    }
}
