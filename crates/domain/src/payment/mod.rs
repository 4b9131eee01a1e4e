//! Payment records owned by orders.

mod aggregate;
mod events;
mod service;

pub use aggregate::{NewPayment, Payment, PaymentStatus};
pub use events::PaymentEvent;
pub use service::PaymentService;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value_objects::Money;

/// Outcome reported by the external payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAuthorization {
    pub transaction_ref: String,
    pub approved: bool,
    pub authorized_at: DateTime<Utc>,
    #[serde(default)]
    pub message: Option<String>,
}

impl PaymentAuthorization {
    pub fn approved(transaction_ref: impl Into<String>) -> Self {
        Self {
            transaction_ref: transaction_ref.into(),
            approved: true,
            authorized_at: Utc::now(),
            message: None,
        }
    }

    pub fn declined(transaction_ref: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            transaction_ref: transaction_ref.into(),
            approved: false,
            authorized_at: Utc::now(),
            message: Some(message.into()),
        }
    }
}

/// Errors that can occur during payment operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Payment already recorded")]
    AlreadyRecorded,

    #[error("Payment is not recorded")]
    NotRecorded,

    #[error("Invalid payment amount: {amount}")]
    InvalidAmount { amount: Money },

    #[error("Invalid currency code: {currency:?}")]
    InvalidCurrency { currency: String },

    #[error("Cannot {action} a payment that is {status}")]
    InvalidStatus {
        status: PaymentStatus,
        action: &'static str,
    },
}
