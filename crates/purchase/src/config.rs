use crate::allowance::ApprovalPolicy;
use crate::constants::{
    CONFIRMATION_POLL_INTERVAL_SECS, CONFIRMATION_TIMEOUT_SECS, DEFAULT_BACKEND_URL, DEFAULT_NETWORK,
    DEFAULT_STORE_PATH, ERROR_DISPLAY_SECS, MIN_CONFIRMATIONS, RECORD_LOCK_MARGIN_SECS,
};
use crate::error::{PurchaseError, Result};
use crate::poller::PollerConfig;
use ethereum::Address;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Timing and policy shared by every purchase run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub poll_interval: Duration,
    /// `None` waits for confirmation without a deadline
    pub confirmation_timeout: Option<Duration>,
    pub min_confirmations: u64,
    pub error_display: Duration,
    pub approval_policy: ApprovalPolicy,
    pub reconcile_receipts: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(CONFIRMATION_POLL_INTERVAL_SECS),
            confirmation_timeout: Some(Duration::from_secs(CONFIRMATION_TIMEOUT_SECS)),
            min_confirmations: MIN_CONFIRMATIONS,
            error_display: Duration::from_secs(ERROR_DISPLAY_SECS),
            approval_policy: ApprovalPolicy::default(),
            reconcile_receipts: true,
        }
    }
}

impl WorkflowSettings {
    /// Upper bound for an approval to be mined, follows the confirmation deadline
    pub fn approval_wait(&self) -> Duration {
        self.confirmation_timeout
            .unwrap_or(Duration::from_secs(CONFIRMATION_TIMEOUT_SECS))
    }

    /// Age after which a run's record lock counts as abandoned.
    /// A run waits for its approval, then for confirmation; without a
    /// confirmation deadline the lock never expires.
    pub fn record_lock_timeout(&self) -> Duration {
        match self.confirmation_timeout {
            Some(confirmation) => self
                .approval_wait()
                .saturating_add(confirmation)
                .saturating_add(self.poll_interval.saturating_mul(2))
                .saturating_add(Duration::from_secs(RECORD_LOCK_MARGIN_SECS)),
            None => Duration::MAX,
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: self.poll_interval,
            max_wait: self.confirmation_timeout,
            min_confirmations: self.min_confirmations,
            reconcile_receipts: self.reconcile_receipts,
        }
    }
}

/// Connection and workflow settings for the purchase service
#[derive(Clone)]
pub struct PurchaseConfig {
    pub network: String,
    /// Overrides the network's public endpoints
    pub rpc_url: Option<String>,
    pub private_key: Option<String>,
    pub market_contract: Option<Address>,
    pub backend_url: String,
    pub backend_token: Option<String>,
    pub store_path: PathBuf,
    pub workflow: WorkflowSettings,
}

impl fmt::Debug for PurchaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PurchaseConfig")
            .field("network", &self.network)
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("market_contract", &self.market_contract)
            .field("backend_url", &self.backend_url)
            .field("backend_token", &self.backend_token.as_ref().map(|_| "<redacted>"))
            .field("store_path", &self.store_path)
            .field("workflow", &self.workflow)
            .finish()
    }
}

impl PurchaseConfig {
    /// Read settings from the environment after loading `.env`
    ///
    /// ## Environment Variables
    ///
    /// - `MARKETPLACE_NETWORK` (default: "localhost")
    /// - `MARKETPLACE_RPC_URL`, `MARKETPLACE_PRIVATE_KEY`, `MARKETPLACE_CONTRACT`
    /// - `MARKETPLACE_BACKEND_URL`, `MARKETPLACE_BACKEND_TOKEN`
    /// - `CONFIRMATION_POLL_INTERVAL_SECS` (default: 5)
    /// - `CONFIRMATION_TIMEOUT_SECS` (default: 600, 0 disables the deadline)
    /// - `MIN_CONFIRMATIONS` (default: 1)
    /// - `ERROR_DISPLAY_SECS` (default: 5)
    /// - `APPROVAL_POLICY`: "unlimited" or "exact" (default: "unlimited")
    /// - `RECONCILE_RECEIPTS` (default: true)
    /// - `STORE_PATH` (default: "./data/marketplace.json")
    pub fn from_env() -> Result<Self> {
        // Try to load .env file, but don't fail if it doesn't exist
        let _ = dotenvy::dotenv();
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let market_contract = get("MARKETPLACE_CONTRACT")
            .map(|raw| {
                Address::from_str(&raw).map_err(|e| PurchaseError::InvalidEnvVar {
                    var: "MARKETPLACE_CONTRACT".to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let timeout_secs: u64 = parse_var(&get, "CONFIRMATION_TIMEOUT_SECS", CONFIRMATION_TIMEOUT_SECS)?;
        let approval_policy = match get("APPROVAL_POLICY") {
            Some(raw) => raw.parse().map_err(|reason| PurchaseError::InvalidEnvVar {
                var: "APPROVAL_POLICY".to_string(),
                reason,
            })?,
            None => ApprovalPolicy::default(),
        };

        let workflow = WorkflowSettings {
            poll_interval: Duration::from_secs(parse_var(
                &get,
                "CONFIRMATION_POLL_INTERVAL_SECS",
                CONFIRMATION_POLL_INTERVAL_SECS,
            )?),
            confirmation_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            min_confirmations: parse_var(&get, "MIN_CONFIRMATIONS", MIN_CONFIRMATIONS)?,
            error_display: Duration::from_secs(parse_var(&get, "ERROR_DISPLAY_SECS", ERROR_DISPLAY_SECS)?),
            approval_policy,
            reconcile_receipts: parse_var(&get, "RECONCILE_RECEIPTS", true)?,
        };

        if workflow.poll_interval.is_zero() {
            return Err(PurchaseError::InvalidEnvVar {
                var: "CONFIRMATION_POLL_INTERVAL_SECS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            network: get("MARKETPLACE_NETWORK").unwrap_or_else(|| DEFAULT_NETWORK.to_string()),
            rpc_url: get("MARKETPLACE_RPC_URL"),
            private_key: get("MARKETPLACE_PRIVATE_KEY"),
            market_contract,
            backend_url: get("MARKETPLACE_BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            backend_token: get("MARKETPLACE_BACKEND_TOKEN"),
            store_path: get("STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
            workflow,
        })
    }

    /// Market contract address, required for any write
    pub fn require_contract(&self) -> Result<Address> {
        self.market_contract
            .ok_or_else(|| PurchaseError::MissingEnvVar("MARKETPLACE_CONTRACT".to_string()))
    }
}

fn parse_var<T, G>(get: &G, var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw.parse::<T>().map_err(|e| PurchaseError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
