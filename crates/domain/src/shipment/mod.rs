//! Shipping records owned by orders.

mod aggregate;
mod events;
mod service;

pub use aggregate::{NewShipment, Shipment, ShipmentStatus};
pub use events::ShipmentEvent;
pub use service::ShipmentService;

use thiserror::Error;

/// Errors that can occur during shipment operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShipmentError {
    #[error("Shipment already recorded")]
    AlreadyRecorded,

    #[error("Shipment is not recorded")]
    NotRecorded,

    #[error("Recipient name is required")]
    RecipientRequired,

    #[error("Tracking number must not be empty")]
    EmptyTrackingNumber,

    #[error("Cannot {action} a shipment that is {status}")]
    InvalidStatus {
        status: ShipmentStatus,
        action: &'static str,
    },
}
