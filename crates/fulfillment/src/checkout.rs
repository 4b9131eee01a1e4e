//! Checkout saga steps and progress tracking.

use std::fmt;

/// Step name: write the order in its invisible staged form.
pub const STEP_STAGE_ORDER: &str = "stage_order";

/// Step name: record the payment for the order.
pub const STEP_RECORD_PAYMENT: &str = "record_payment";

/// Step name: record the shipment for the order.
pub const STEP_RECORD_SHIPMENT: &str = "record_shipment";

/// Step name: make the order visible.
pub const STEP_CONFIRM_ORDER: &str = "confirm_order";

/// Step name: single atomic write of order, payment and shipment.
pub const STEP_COMMIT_ORDER: &str = "commit_order";

/// The state of a checkout in its lifecycle.
///
/// State transitions:
/// ```text
/// Running ──┬──► Completed
///           └──► Compensating ──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CheckoutState {
    #[default]
    Running,
    Compensating,
    Completed,
    Failed,
}

impl CheckoutState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckoutState::Completed | CheckoutState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::Running => "Running",
            CheckoutState::Compensating => "Compensating",
            CheckoutState::Completed => "Completed",
            CheckoutState::Failed => "Failed",
        }
    }
}

impl fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one saga-mode checkout.
///
/// Completed steps are undone in reverse order when a later step fails.
#[derive(Debug, Default)]
pub struct CheckoutSaga {
    state: CheckoutState,
    completed: Vec<&'static str>,
    failed_step: Option<&'static str>,
}

impl CheckoutSaga {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CheckoutState {
        self.state
    }

    pub fn completed_steps(&self) -> &[&'static str] {
        &self.completed
    }

    pub fn failed_step(&self) -> Option<&'static str> {
        self.failed_step
    }

    pub fn step_completed(&mut self, step: &'static str) {
        self.completed.push(step);
    }

    /// Records the failure and returns the steps to undo, newest first.
    pub fn step_failed(&mut self, step: &'static str) -> Vec<&'static str> {
        self.failed_step = Some(step);
        self.state = CheckoutState::Compensating;
        self.completed.iter().rev().copied().collect()
    }

    pub fn finish(&mut self) {
        self.state = match self.state {
            CheckoutState::Running => CheckoutState::Completed,
            _ => CheckoutState::Failed,
        };
    }
}
