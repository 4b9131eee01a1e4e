//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

use crate::order::OrderError;
use crate::payment::PaymentError;
use crate::product::ProductError;
use crate::shipment::ShipmentError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A product command was rejected.
    #[error("Product error: {0}")]
    Product(ProductError),

    /// An order command was rejected.
    #[error("Order error: {0}")]
    Order(OrderError),

    /// A payment command was rejected.
    #[error("Payment error: {0}")]
    Payment(PaymentError),

    /// A shipment command was rejected.
    #[error("Shipment error: {0}")]
    Shipment(ShipmentError),

    /// Aggregate not found.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns true if a concurrent writer moved the stream first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }

    pub(crate) fn not_found(aggregate_type: &'static str, aggregate_id: impl ToString) -> Self {
        DomainError::AggregateNotFound {
            aggregate_type,
            aggregate_id: aggregate_id.to_string(),
        }
    }
}

impl From<ProductError> for DomainError {
    fn from(e: ProductError) -> Self {
        DomainError::Product(e)
    }
}

impl From<OrderError> for DomainError {
    fn from(e: OrderError) -> Self {
        DomainError::Order(e)
    }
}

impl From<PaymentError> for DomainError {
    fn from(e: PaymentError) -> Self {
        DomainError::Payment(e)
    }
}

impl From<ShipmentError> for DomainError {
    fn from(e: ShipmentError) -> Self {
        DomainError::Shipment(e)
    }
}
