//! Transaction lifecycle state machine and its notifications.
//!
//! ```text
//! Idle ──► Approving ──► Approved ──► Submitting ──► Confirmed
//!  │            │                         ▲    │
//!  │            └──────► Failed ◄─────────┼────┘
//!  └──────────────────────────────────────┘   (settlement: no approval)
//! ```
//!
//! The machine is pure: each transition returns the [`LifecycleEvent`] to
//! publish, and whoever drives it hands that event to a [`Notifier`].

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::errors::{LedgerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Idle,
    Approving,
    Approved,
    Submitting,
    Confirmed,
    Failed,
}

impl TxState {
    fn can_move_to(self, next: TxState) -> bool {
        use TxState::*;
        matches!(
            (self, next),
            (Idle, Approving)
                | (Idle, Submitting)
                | (Approving, Approved)
                | (Approving, Failed)
                | (Approved, Submitting)
                | (Submitting, Confirmed)
                | (Submitting, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TxState::Confirmed | TxState::Failed)
    }
}

/// The user-initiated action a lifecycle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Deposit,
    Settlement,
}

/// The on-chain step inside an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Approval,
    Deposit,
    Settlement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    pub action: Action,
    pub step: Step,
    pub kind: EventKind,
    pub message: String,
}

impl LifecycleEvent {
    pub fn is_terminal(&self) -> bool {
        self.kind != EventKind::Pending
    }
}

fn pending_message(step: Step) -> &'static str {
    match step {
        Step::Approval => "Approving transaction...",
        Step::Deposit => "Depositing funds to this Content...",
        Step::Settlement => "Selling funds for this Content...",
    }
}

fn success_message(step: Step) -> &'static str {
    match step {
        Step::Approval => "Limit Approved",
        Step::Deposit => "Funds Deposited",
        Step::Settlement => "Funds Sold",
    }
}

fn failure_message(action: Action) -> &'static str {
    match action {
        Action::Deposit => "Error in depositing funds",
        Action::Settlement => "Error in selling funds",
    }
}

// ─────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Lifecycle {
    action: Action,
    state: TxState,
    step: Option<Step>,
}

impl Lifecycle {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            state: TxState::Idle,
            step: None,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn action(&self) -> Action {
        self.action
    }

    /// Return to `Idle` for a new attempt. Only allowed from `Idle` or a
    /// terminal state.
    pub fn restart(&mut self, action: Action) -> Result<()> {
        if self.state != TxState::Idle && !self.state.is_terminal() {
            return Err(LedgerError::InvalidTransition {
                from: self.state,
                to: TxState::Idle,
            });
        }
        *self = Lifecycle::new(action);
        Ok(())
    }

    fn advance(&mut self, next: TxState) -> Result<()> {
        // Deposits must pass through approval; settlements never do.
        let bypasses_approval = self.state == TxState::Idle && next == TxState::Submitting;
        let needs_approval = self.action == Action::Deposit;
        let allowed = self.state.can_move_to(next)
            && !(bypasses_approval && needs_approval)
            && !(next == TxState::Approving && !needs_approval);
        if !allowed {
            return Err(LedgerError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    fn event(&self, step: Step, kind: EventKind, message: String) -> LifecycleEvent {
        LifecycleEvent {
            action: self.action,
            step,
            kind,
            message,
        }
    }

    /// `Idle → Approving`.
    pub fn begin_approval(&mut self) -> Result<LifecycleEvent> {
        self.advance(TxState::Approving)?;
        self.step = Some(Step::Approval);
        Ok(self.event(
            Step::Approval,
            EventKind::Pending,
            pending_message(Step::Approval).to_string(),
        ))
    }

    /// `Approving → Approved`.
    pub fn approval_confirmed(&mut self) -> Result<LifecycleEvent> {
        self.advance(TxState::Approved)?;
        Ok(self.event(
            Step::Approval,
            EventKind::Succeeded,
            success_message(Step::Approval).to_string(),
        ))
    }

    /// `Idle | Approved → Submitting` for the action's main step.
    pub fn begin_submission(&mut self) -> Result<LifecycleEvent> {
        let step = match self.action {
            Action::Deposit => Step::Deposit,
            Action::Settlement => Step::Settlement,
        };
        self.advance(TxState::Submitting)?;
        self.step = Some(step);
        Ok(self.event(step, EventKind::Pending, pending_message(step).to_string()))
    }

    /// `Submitting → Confirmed`.
    pub fn submission_confirmed(&mut self) -> Result<LifecycleEvent> {
        self.advance(TxState::Confirmed)?;
        let step = self.step.unwrap_or(Step::Deposit);
        Ok(self.event(step, EventKind::Succeeded, success_message(step).to_string()))
    }

    /// `Approving | Submitting → Failed`.
    pub fn fail(&mut self, err: &LedgerError) -> Result<LifecycleEvent> {
        self.advance(TxState::Failed)?;
        let step = self.step.unwrap_or(Step::Approval);
        Ok(self.event(
            step,
            EventKind::Failed,
            format!("{}: {}", failure_message(self.action), err),
        ))
    }
}

// ─────────────────────────────────────────────────────────
// Subscribers
// ─────────────────────────────────────────────────────────

/// Receives lifecycle events; rendering them is entirely up to the subscriber.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &LifecycleEvent);
}

/// Renders events as log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &LifecycleEvent) {
        match event.kind {
            EventKind::Failed => error!(action = ?event.action, step = ?event.step, "{}", event.message),
            _ => info!(action = ?event.action, step = ?event.step, "{}", event.message),
        }
    }
}

/// Forwards events to an async consumer. A closed channel drops events.
impl Notifier for mpsc::UnboundedSender<LifecycleEvent> {
    fn notify(&self, event: &LifecycleEvent) {
        let _ = self.send(event.clone());
    }
}

/// Fans one event out to several subscribers, in order.
impl<A: Notifier, B: Notifier> Notifier for (A, B) {
    fn notify(&self, event: &LifecycleEvent) {
        self.0.notify(event);
        self.1.notify(event);
    }
}
