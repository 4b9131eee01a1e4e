//! Payment domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::value_objects::{Money, PaymentMethod};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    PaymentRecorded {
        payment_id: AggregateId,
        order_id: AggregateId,
        method: PaymentMethod,
        amount: Money,
        currency: String,
        recorded_at: DateTime<Utc>,
    },

    PaymentCompleted {
        transaction_ref: String,
        paid_at: DateTime<Utc>,
    },

    PaymentFailed {
        #[serde(default)]
        transaction_ref: Option<String>,
        reason: String,
        failed_at: DateTime<Utc>,
    },

    PaymentRefunded { refunded_at: DateTime<Utc> },

    /// The owning order was rolled back during checkout.
    PaymentDiscarded { reason: String },
}

impl DomainEvent for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentRecorded { .. } => "PaymentRecorded",
            PaymentEvent::PaymentCompleted { .. } => "PaymentCompleted",
            PaymentEvent::PaymentFailed { .. } => "PaymentFailed",
            PaymentEvent::PaymentRefunded { .. } => "PaymentRefunded",
            PaymentEvent::PaymentDiscarded { .. } => "PaymentDiscarded",
        }
    }
}
