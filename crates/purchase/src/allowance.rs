use crate::chain::{ChainClient, format_tx_hash};
use crate::constants::{CONFIRMATION_POLL_INTERVAL_SECS, CONFIRMATION_TIMEOUT_SECS, MIN_CONFIRMATIONS};
use crate::error::{PurchaseError, Result};
use chrono::{DateTime, Utc};
use ethereum::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Amount requested when the current allowance is too low
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalPolicy {
    /// Approve `U256::MAX` once, later purchases need no approval
    #[default]
    Unlimited,
    /// Approve exactly the purchase price
    Exact,
}

impl ApprovalPolicy {
    pub fn approval_amount(self, required: U256) -> U256 {
        match self {
            Self::Unlimited => U256::MAX,
            Self::Exact => required,
        }
    }
}

impl fmt::Display for ApprovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => write!(f, "unlimited"),
            Self::Exact => write!(f, "exact"),
        }
    }
}

impl FromStr for ApprovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unlimited" | "max" => Ok(Self::Unlimited),
            "exact" => Ok(Self::Exact),
            other => Err(format!("expected 'unlimited' or 'exact', got '{}'", other)),
        }
    }
}

/// Allowance of `spender` over `owner`'s tokens at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowanceSnapshot {
    pub token: Address,
    pub owner: Address,
    pub spender: Address,
    pub amount: U256,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AllowanceOutcome {
    /// True when no approval was needed
    pub sufficient: bool,
    /// Approval transaction, set when one was sent
    pub tx_hash: Option<TxHash>,
    pub snapshot: AllowanceSnapshot,
}

/// Makes sure the market contract may pull the purchase price from the buyer
pub struct AllowanceGate {
    chain: Arc<dyn ChainClient>,
    policy: ApprovalPolicy,
    poll_interval: Duration,
    max_wait: Duration,
    min_confirmations: u64,
}

impl AllowanceGate {
    pub fn new(chain: Arc<dyn ChainClient>, policy: ApprovalPolicy) -> Self {
        Self {
            chain,
            policy,
            poll_interval: Duration::from_secs(CONFIRMATION_POLL_INTERVAL_SECS),
            max_wait: Duration::from_secs(CONFIRMATION_TIMEOUT_SECS),
            min_confirmations: MIN_CONFIRMATIONS,
        }
    }

    /// Timing used by `wait_for_approval`
    pub fn with_polling(mut self, poll_interval: Duration, max_wait: Duration, min_confirmations: u64) -> Self {
        self.poll_interval = poll_interval;
        self.max_wait = max_wait;
        self.min_confirmations = min_confirmations;
        self
    }

    pub fn policy(&self) -> ApprovalPolicy {
        self.policy
    }

    pub async fn check_allowance(&self, token: Address, owner: Address, spender: Address) -> Result<AllowanceSnapshot> {
        let amount = self
            .chain
            .allowance(token, owner, spender)
            .await
            .map_err(|e| PurchaseError::RpcUnavailable(e.to_string()))?;

        Ok(AllowanceSnapshot {
            token,
            owner,
            spender,
            amount,
            taken_at: Utc::now(),
        })
    }

    /// Send an approval when the current allowance is below `required`.
    ///
    /// Returns immediately after the approval was broadcast; use
    /// `wait_for_approval` to wait for it to be mined.
    pub async fn ensure_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        required: U256,
    ) -> Result<AllowanceOutcome> {
        let snapshot = self
            .check_allowance(token, owner, spender)
            .await
            .map_err(|e| PurchaseError::ApprovalFailed(e.to_string()))?;

        if snapshot.amount >= required {
            debug!(
                "Allowance {} of {} for {} covers {}",
                snapshot.amount, owner, spender, required
            );
            return Ok(AllowanceOutcome {
                sufficient: true,
                tx_hash: None,
                snapshot,
            });
        }

        let amount = self.policy.approval_amount(required);
        info!(
            "Approving {} for {} on token {} (allowance {}, required {}, policy {})",
            spender, owner, token, snapshot.amount, required, self.policy
        );

        let tx_hash = self
            .chain
            .approve(token, spender, amount)
            .await
            .map_err(|e| PurchaseError::ApprovalFailed(e.to_string()))?;

        info!("Approval transaction sent: {}", format_tx_hash(&tx_hash));
        Ok(AllowanceOutcome {
            sufficient: false,
            tx_hash: Some(tx_hash),
            snapshot,
        })
    }

    /// Poll the approval receipt until it is mined with enough confirmations
    pub async fn wait_for_approval(&self, tx_hash: TxHash) -> Result<()> {
        let start = Instant::now();
        let hash = format_tx_hash(&tx_hash);
        debug!("Waiting for approval {} (max {:?})", hash, self.max_wait);

        loop {
            match self.chain.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if !receipt.success => {
                    return Err(PurchaseError::ApprovalFailed(format!(
                        "approval transaction {} reverted",
                        hash
                    )));
                }
                Ok(Some(receipt)) if receipt.confirmations >= self.min_confirmations => {
                    info!(
                        "Approval {} mined in block {:?} after {:?}",
                        hash,
                        receipt.block_number,
                        start.elapsed()
                    );
                    return Ok(());
                }
                Ok(Some(receipt)) => {
                    debug!(
                        "Approval {} has {}/{} confirmations",
                        hash, receipt.confirmations, self.min_confirmations
                    );
                }
                Ok(None) => debug!("Approval {} not mined yet", hash),
                Err(e) => warn!("Failed to read receipt of approval {}: {}", hash, e),
            }

            if start.elapsed() >= self.max_wait {
                return Err(PurchaseError::Timeout {
                    tx_hash: hash,
                    seconds: self.max_wait.as_secs(),
                });
            }
            sleep(self.poll_interval).await;
        }
    }
}
