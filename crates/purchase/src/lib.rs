//! # Marketplace Purchase Workflow
//!
//! Drives a ticket purchase or offer acceptance through token allowance,
//! contract submission and confirmation tracking:
//!
//! `IDLE → AWAITING_ALLOWANCE → AWAITING_SUBMISSION → AWAITING_CONFIRMATION → DONE`
//!
//! Any step may end in `ERROR`. The UI observes progress through a
//! `watch::Receiver<WorkflowState>` obtained from `PurchaseService`.

pub mod allowance;
pub mod backend;
pub mod balance;
pub mod chain;
pub mod config;
pub mod constants;
pub mod error;
pub mod key_lock;
pub mod pending;
pub mod poller;
pub mod refresh;
pub mod service;
pub mod state;
pub mod store;
pub mod submitter;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use allowance::{AllowanceGate, AllowanceOutcome, AllowanceSnapshot, ApprovalPolicy};
pub use backend::{HttpRecordBackend, RecordBackend, RecordSnapshot, RecordUpdate};
pub use balance::BalanceQuery;
pub use chain::{ChainClient, format_tx_hash};
pub use config::{PurchaseConfig, WorkflowSettings};
pub use error::{PurchaseError, Result};
pub use pending::{PendingTransaction, RecordKind, RecordRef, TransactionStatus};
pub use poller::{CancelHandle, ConfirmationPoller, PollOutcome, PollerConfig};
pub use refresh::{BackendRefresher, ViewRefresher};
pub use service::{PurchaseHandle, PurchaseService};
pub use state::{StateTracker, Step, WorkflowState};
pub use store::{FileStore, KeyValueStore, MemoryStore, PendingTxStore, StoredTransaction};
pub use submitter::TransactionSubmitter;
pub use workflow::{PurchaseRequest, PurchaseWorkflow, RunMode, WorkflowContext};
