use crate::pending::RecordRef;
use crate::state::Step;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PurchaseError {
    #[error("Token approval failed: {0}")]
    ApprovalFailed(String),

    #[error("Invalid seller signature: {0}")]
    InvalidSignature(String),

    #[error("{method} failed: {reason}")]
    SubmissionFailed { method: String, reason: String },

    #[error("Transaction {tx_hash} failed: {reason}")]
    TransactionFailed { tx_hash: String, reason: String },

    #[error("RPC unavailable: {0}")]
    RpcUnavailable(String),

    #[error("Transaction {tx_hash} not confirmed after {seconds} seconds")]
    Timeout { tx_hash: String, seconds: u64 },

    #[error("A purchase for {record} is already in progress")]
    AlreadyInProgress { record: RecordRef },

    #[error("Transaction {tx_hash} for {record} is already being watched")]
    AlreadyWatching { record: RecordRef, tx_hash: String },

    #[error("Invalid workflow transition from {from} to {to}")]
    InvalidTransition { from: Step, to: Step },

    #[error("Purchase cancelled")]
    Cancelled,

    #[error("Record not found: {0}")]
    RecordNotFound(RecordRef),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment variable {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl PurchaseError {
    /// Text shown to the buyer while the workflow sits in the error step
    pub fn user_message(&self) -> String {
        match self {
            Self::ApprovalFailed(reason) => format!("Token approval failed: {}", reason),
            Self::InvalidSignature(_) => {
                "The seller's signature for this offer is invalid".to_string()
            }
            Self::SubmissionFailed { method, reason } => {
                format!("Could not send {} transaction: {}", method, reason)
            }
            Self::TransactionFailed { .. } => "The transaction failed on chain".to_string(),
            Self::Timeout { .. } => {
                "The transaction is taking longer than expected; it will be checked again later"
                    .to_string()
            }
            other => other.to_string(),
        }
    }

    /// Failures on the write path that must stop the workflow in the error step
    pub fn is_write_path(&self) -> bool {
        matches!(
            self,
            Self::ApprovalFailed(_)
                | Self::InvalidSignature(_)
                | Self::SubmissionFailed { .. }
                | Self::TransactionFailed { .. }
        )
    }
}

impl From<reqwest::Error> for PurchaseError {
    fn from(e: reqwest::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<std::io::Error> for PurchaseError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PurchaseError>;
