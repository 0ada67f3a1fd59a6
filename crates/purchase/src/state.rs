use crate::error::{PurchaseError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Progress of one purchase, in the order the steps are visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    Idle,
    AwaitingAllowance,
    AwaitingSubmission,
    AwaitingConfirmation,
    Done,
    Error,
}

impl Step {
    /// No run is active in these steps, so a new purchase may start
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Idle | Self::Done | Self::Error)
    }

    /// Steps only move forward, `Done` requires `AwaitingConfirmation`,
    /// and any step may reset to `Idle`.
    pub fn can_transition_to(self, next: Step) -> bool {
        match next {
            Self::Idle => true,
            Self::Error => !matches!(self, Self::Idle | Self::Done | Self::Error),
            Self::Done => self == Self::AwaitingConfirmation,
            _ => !matches!(self, Self::Done | Self::Error) && next > self,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::AwaitingAllowance => "AWAITING_ALLOWANCE",
            Self::AwaitingSubmission => "AWAITING_SUBMISSION",
            Self::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// UI-visible state of a purchase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub step: Step,
    pub error_message: Option<String>,
    pub transaction_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn idle() -> Self {
        Self {
            step: Step::Idle,
            error_message: None,
            transaction_hash: None,
            updated_at: Utc::now(),
        }
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Owner side of a workflow state; readers hold `watch::Receiver`s
#[derive(Clone)]
pub struct StateTracker {
    tx: Arc<watch::Sender<WorkflowState>>,
}

impl StateTracker {
    pub fn new() -> (Self, watch::Receiver<WorkflowState>) {
        let (tx, rx) = watch::channel(WorkflowState::idle());
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn current(&self) -> WorkflowState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.tx.subscribe()
    }

    /// Move to `next`, rejecting transitions that break the step ordering
    pub fn advance(&self, next: Step) -> Result<()> {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| {
            if !state.step.can_transition_to(next) {
                result = Err(PurchaseError::InvalidTransition { from: state.step, to: next });
                return false;
            }
            debug!("Workflow step {} -> {}", state.step, next);
            state.step = next;
            state.error_message = None;
            state.updated_at = Utc::now();
            true
        });
        if let Err(e) = &result {
            warn!("Rejected workflow transition: {}", e);
        }
        result
    }

    pub fn set_transaction_hash(&self, tx_hash: &str) {
        self.tx.send_modify(|state| {
            state.transaction_hash = Some(tx_hash.to_string());
            state.updated_at = Utc::now();
        });
    }

    /// Enter the error step with a message for the buyer
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_if_modified(|state| {
            if !state.step.can_transition_to(Step::Error) {
                warn!("Ignoring error in step {}: {}", state.step, message);
                return false;
            }
            state.step = Step::Error;
            state.error_message = Some(message.clone());
            state.updated_at = Utc::now();
            true
        });
    }

    pub fn reset(&self) {
        self.tx.send_modify(|state| {
            *state = WorkflowState {
                transaction_hash: state.transaction_hash.take(),
                ..WorkflowState::idle()
            };
        });
    }

    /// Dismiss the current error after `delay`, unless the state changed meanwhile
    pub fn schedule_reset(&self, delay: Duration) {
        let snapshot = self.current();
        if snapshot.step != Step::Error {
            return;
        }
        let tracker = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracker.tx.send_if_modified(|state| {
                if state.step != Step::Error || state.updated_at != snapshot.updated_at {
                    return false;
                }
                debug!("Dismissing workflow error: {:?}", state.error_message);
                *state = WorkflowState::idle();
                true
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        use Step::*;
        assert!(Idle.can_transition_to(AwaitingAllowance));
        assert!(AwaitingAllowance.can_transition_to(AwaitingSubmission));
        assert!(AwaitingSubmission.can_transition_to(AwaitingConfirmation));
        assert!(AwaitingConfirmation.can_transition_to(Done));

        // Resuming after a reload jumps straight to confirmation
        assert!(Idle.can_transition_to(AwaitingConfirmation));

        // Never backwards, never past confirmation
        assert!(!AwaitingSubmission.can_transition_to(AwaitingAllowance));
        assert!(!AwaitingSubmission.can_transition_to(Done));
        assert!(!Idle.can_transition_to(Done));
        assert!(!Done.can_transition_to(AwaitingAllowance));
        assert!(!Error.can_transition_to(AwaitingSubmission));
    }

    #[test]
    fn test_error_and_reset_transitions() {
        use Step::*;
        for step in [AwaitingAllowance, AwaitingSubmission, AwaitingConfirmation] {
            assert!(step.can_transition_to(Error));
            assert!(step.can_transition_to(Idle));
        }
        assert!(!Idle.can_transition_to(Error));
        assert!(!Done.can_transition_to(Error));
        assert!(Error.can_transition_to(Idle));
        assert!(Done.can_transition_to(Idle));
    }

    #[test]
    fn test_tracker_rejects_invalid_transition() {
        let (tracker, rx) = StateTracker::new();
        tracker.advance(Step::AwaitingAllowance).unwrap();

        let err = tracker.advance(Step::Done).unwrap_err();
        assert!(matches!(
            err,
            PurchaseError::InvalidTransition { from: Step::AwaitingAllowance, to: Step::Done }
        ));
        assert_eq!(rx.borrow().step, Step::AwaitingAllowance);
    }

    #[test]
    fn test_fail_sets_message() {
        let (tracker, rx) = StateTracker::new();
        tracker.advance(Step::AwaitingAllowance).unwrap();
        tracker.fail("wallet rejected");

        let state = rx.borrow().clone();
        assert_eq!(state.step, Step::Error);
        assert_eq!(state.error_message.as_deref(), Some("wallet rejected"));

        // Leaving the error step clears the message
        tracker.reset();
        assert_eq!(rx.borrow().step, Step::Idle);
        assert!(rx.borrow().error_message.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_is_dismissed_after_delay() {
        let (tracker, rx) = StateTracker::new();
        tracker.advance(Step::AwaitingSubmission).unwrap();
        tracker.fail("boom");
        tracker.schedule_reset(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(rx.borrow().step, Step::Error);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.borrow().step, Step::Idle);
    }
}
