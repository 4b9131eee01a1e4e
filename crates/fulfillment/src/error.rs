//! Fulfillment error types.

use std::fmt;

use common::{AggregateId, ProductId};
use domain::{DomainError, OrderStatus};
use thiserror::Error;

/// Errors surfaced by the ledger, orchestrator and lifecycle.
///
/// Everything except `PersistenceFailure` is side-effect free: no stock
/// moved and no record changed.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The request was malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: ProductId },

    #[error("Product {product_id} is inactive")]
    InactiveProduct { product_id: ProductId },

    /// Not enough stock, or the reservation timed out under contention
    /// (`available` is then unknown).
    #[error("Product {product_id} is out of stock: requested {requested}{}", fmt_available(.available))]
    OutOfStock {
        product_id: ProductId,
        requested: u32,
        available: Option<u32>,
    },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    /// The request is well formed but the record's state forbids it.
    #[error("Operation rejected: {0}")]
    InvalidOperation(String),

    /// Storage failed. Any stock reserved for the request was released
    /// before this was returned, so the call can be retried.
    #[error("Persistence failure during {step}: {reason}")]
    PersistenceFailure { step: &'static str, reason: String },
}

fn fmt_available(available: &Option<u32>) -> String {
    match available {
        Some(available) => format!(", available {available}"),
        None => ", reservation timed out".to_string(),
    }
}

impl FulfillmentError {
    pub fn persistence(step: &'static str, reason: impl fmt::Display) -> Self {
        FulfillmentError::PersistenceFailure {
            step,
            reason: reason.to_string(),
        }
    }

    /// Maps a record-level error: rule violations become `InvalidOperation`,
    /// storage errors become `PersistenceFailure`.
    pub fn from_domain(step: &'static str, error: DomainError) -> Self {
        match error {
            DomainError::Order(e) => FulfillmentError::InvalidOperation(e.to_string()),
            DomainError::Payment(e) => FulfillmentError::InvalidOperation(e.to_string()),
            DomainError::Shipment(e) => FulfillmentError::InvalidOperation(e.to_string()),
            DomainError::Product(e) => FulfillmentError::InvalidOperation(e.to_string()),
            other => FulfillmentError::persistence(step, other),
        }
    }

    /// True if the caller may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FulfillmentError::PersistenceFailure { .. })
    }

    /// The product an inventory failure refers to.
    pub fn product_id(&self) -> Option<ProductId> {
        match self {
            FulfillmentError::ProductNotFound { product_id }
            | FulfillmentError::InactiveProduct { product_id }
            | FulfillmentError::OutOfStock { product_id, .. } => Some(*product_id),
            _ => None,
        }
    }

    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FulfillmentError::InvalidInput(_) => "invalid_input",
            FulfillmentError::ProductNotFound { .. } => "product_not_found",
            FulfillmentError::InactiveProduct { .. } => "inactive_product",
            FulfillmentError::OutOfStock { .. } => "out_of_stock",
            FulfillmentError::InvalidTransition { .. } => "invalid_transition",
            FulfillmentError::OrderNotFound(_) => "order_not_found",
            FulfillmentError::InvalidOperation(_) => "invalid_operation",
            FulfillmentError::PersistenceFailure { .. } => "persistence_failure",
        }
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use domain::PaymentError;
    use event_store::EventStoreError;

    #[test]
    fn test_out_of_stock_message_names_product() {
        let product_id = ProductId::new();
        let err = FulfillmentError::OutOfStock {
            product_id,
            requested: 3,
            available: Some(2),
        };
        let message = err.to_string();
        assert!(message.contains(&product_id.to_string()));
        assert!(message.ends_with("requested 3, available 2"));
        assert_eq!(err.product_id(), Some(product_id));
    }

    #[test]
    fn test_timeout_message() {
        let err = FulfillmentError::OutOfStock {
            product_id: ProductId::new(),
            requested: 1,
            available: None,
        };
        assert!(err.to_string().ends_with("reservation timed out"));
    }

    #[test]
    fn test_only_persistence_failures_are_retryable() {
        assert!(FulfillmentError::persistence("commit_order", "disk full").is_retryable());
        assert!(!FulfillmentError::InvalidInput("no items".into()).is_retryable());
        assert!(!FulfillmentError::OrderNotFound(AggregateId::new()).is_retryable());
    }

    #[test]
    fn test_from_domain_splits_rules_and_storage() {
        let rule = FulfillmentError::from_domain(
            "confirm_payment",
            DomainError::Payment(PaymentError::NotRecorded),
        );
        assert!(matches!(rule, FulfillmentError::InvalidOperation(_)));

        let storage = FulfillmentError::from_domain(
            "confirm_payment",
            DomainError::EventStore(EventStoreError::Unavailable("down".into())),
        );
        assert!(matches!(
            storage,
            FulfillmentError::PersistenceFailure {
                step: "confirm_payment",
                ..
            }
        ));
    }
}
