//! Defaults for polling, timeouts and local storage
//!
//! Every value here can be overridden through the environment, see `config.rs`.

// =============================================================================
// Confirmation polling
// =============================================================================

/// Interval between two status checks of a submitted transaction (in seconds).
/// The next check is scheduled only after the previous one resolved.
pub const CONFIRMATION_POLL_INTERVAL_SECS: u64 = 5;

/// Maximum time to wait for a transaction to reach a terminal status (in seconds).
/// After this the watch ends with a timeout and the stored hash is kept for resume.
pub const CONFIRMATION_TIMEOUT_SECS: u64 = 600; // 10 minutes

/// Block confirmations required before a mined receipt counts as confirmed.
pub const MIN_CONFIRMATIONS: u64 = 1;

// =============================================================================
// Workflow
// =============================================================================

/// How long an error stays visible before the workflow resets to idle (in seconds).
pub const ERROR_DISPLAY_SECS: u64 = 5;

/// Slack added on top of the approval and confirmation waits when bounding the
/// per-record purchase lock (in seconds). Covers submission and backend writes.
pub const RECORD_LOCK_MARGIN_SECS: u64 = 120;

// =============================================================================
// External services
// =============================================================================

/// Timeout for a single backend HTTP request (in seconds).
pub const BACKEND_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Network used when MARKETPLACE_NETWORK is not set.
pub const DEFAULT_NETWORK: &str = "localhost";

/// Backend used when MARKETPLACE_BACKEND_URL is not set.
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:3000/api";

// =============================================================================
// Local storage
// =============================================================================

/// File holding the local key-value store.
pub const DEFAULT_STORE_PATH: &str = "./data/marketplace.json";

/// Key of the most recent unconfirmed transaction in the local store.
pub const PENDING_TX_KEY: &str = "pending_tx";
