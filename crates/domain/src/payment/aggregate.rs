//! Payment aggregate implementation.

use std::fmt;

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::value_objects::{Money, PaymentMethod};

use super::{PaymentAuthorization, PaymentError, PaymentEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        })
    }
}

/// Input for recording a payment next to its order.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: AggregateId,
    pub method: PaymentMethod,
    /// Must equal the order total.
    pub amount: Money,
    pub currency: String,
    /// Gateway result obtained at checkout, if any.
    pub authorization: Option<PaymentAuthorization>,
}

/// Payment aggregate root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payment {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    order_id: Option<AggregateId>,

    method: PaymentMethod,

    amount: Money,

    currency: String,

    status: PaymentStatus,

    paid: bool,

    paid_at: Option<DateTime<Utc>>,

    transaction_ref: Option<String>,

    failure_reason: Option<String>,

    discarded: bool,
}

impl Aggregate for Payment {
    type Event = PaymentEvent;
    type Error = PaymentError;

    fn aggregate_type() -> &'static str {
        "Payment"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn is_visible(&self) -> bool {
        self.id.is_some() && !self.discarded
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            PaymentEvent::PaymentRecorded {
                payment_id,
                order_id,
                method,
                amount,
                currency,
                ..
            } => {
                self.id = Some(payment_id);
                self.order_id = Some(order_id);
                self.method = method;
                self.amount = amount;
                self.currency = currency;
                self.status = PaymentStatus::Pending;
            }
            PaymentEvent::PaymentCompleted {
                transaction_ref,
                paid_at,
            } => {
                self.status = PaymentStatus::Completed;
                self.paid = true;
                self.paid_at = Some(paid_at);
                self.transaction_ref = Some(transaction_ref);
                self.failure_reason = None;
            }
            PaymentEvent::PaymentFailed {
                transaction_ref,
                reason,
                ..
            } => {
                self.status = PaymentStatus::Failed;
                if transaction_ref.is_some() {
                    self.transaction_ref = transaction_ref;
                }
                self.failure_reason = Some(reason);
            }
            PaymentEvent::PaymentRefunded { .. } => {
                self.status = PaymentStatus::Refunded;
                self.paid = false;
            }
            PaymentEvent::PaymentDiscarded { .. } => self.discarded = true,
        }
    }
}

// Query methods
impl Payment {
    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn is_paid(&self) -> bool {
        self.paid
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn transaction_ref(&self) -> Option<&str> {
        self.transaction_ref.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }
}

// Command methods (return events)
impl Payment {
    /// Records the payment; an authorization settles its first status.
    pub fn record(
        &self,
        payment_id: AggregateId,
        payment: NewPayment,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        if self.id.is_some() {
            return Err(PaymentError::AlreadyRecorded);
        }
        if payment.amount.is_negative() {
            return Err(PaymentError::InvalidAmount {
                amount: payment.amount,
            });
        }
        let currency = payment.currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::InvalidCurrency {
                currency: payment.currency,
            });
        }

        let mut events = vec![PaymentEvent::PaymentRecorded {
            payment_id,
            order_id: payment.order_id,
            method: payment.method,
            amount: payment.amount,
            currency,
            recorded_at: Utc::now(),
        }];
        if let Some(authorization) = payment.authorization {
            events.push(outcome(authorization));
        }

        Ok(events)
    }

    /// Applies a gateway result that arrived after checkout.
    ///
    /// Repeating an approval on a completed payment is a no-op.
    pub fn confirm(
        &self,
        authorization: PaymentAuthorization,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_recorded()?;
        match (self.status, authorization.approved) {
            (PaymentStatus::Pending | PaymentStatus::Failed, _) => Ok(vec![outcome(authorization)]),
            (PaymentStatus::Completed, true) => Ok(vec![]),
            (status, _) => Err(PaymentError::InvalidStatus {
                status,
                action: "confirm",
            }),
        }
    }

    /// Reacts to the owning order being cancelled: completed payments are
    /// refunded, pending ones are voided.
    pub fn cancel_for_order(&self) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_recorded()?;
        Ok(match self.status {
            PaymentStatus::Completed => vec![PaymentEvent::PaymentRefunded {
                refunded_at: Utc::now(),
            }],
            PaymentStatus::Pending => vec![PaymentEvent::PaymentFailed {
                transaction_ref: None,
                reason: "order cancelled".to_string(),
                failed_at: Utc::now(),
            }],
            PaymentStatus::Failed | PaymentStatus::Refunded => vec![],
        })
    }

    pub fn discard(&self, reason: impl Into<String>) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_recorded()?;
        if self.discarded {
            return Ok(vec![]);
        }
        Ok(vec![PaymentEvent::PaymentDiscarded {
            reason: reason.into(),
        }])
    }

    fn ensure_recorded(&self) -> Result<(), PaymentError> {
        if self.id.is_none() {
            return Err(PaymentError::NotRecorded);
        }
        Ok(())
    }
}

fn outcome(authorization: PaymentAuthorization) -> PaymentEvent {
    if authorization.approved {
        PaymentEvent::PaymentCompleted {
            transaction_ref: authorization.transaction_ref,
            paid_at: authorization.authorized_at,
        }
    } else {
        PaymentEvent::PaymentFailed {
            transaction_ref: Some(authorization.transaction_ref),
            reason: authorization
                .message
                .unwrap_or_else(|| "declined".to_string()),
            failed_at: authorization.authorized_at,
        }
    }
}
