//! Product stock records.

mod aggregate;
mod events;
mod reservation;
mod service;
mod status;

pub use aggregate::Product;
pub use events::ProductEvent;
pub use reservation::ReservationToken;
pub use service::CatalogService;
pub use status::ProductStatus;

use common::ReservationId;
use thiserror::Error;

use crate::value_objects::Money;

/// Errors that can occur during product operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProductError {
    #[error("Product already registered")]
    AlreadyRegistered,

    #[error("Product is not registered")]
    NotRegistered,

    #[error("Product is inactive")]
    Inactive,

    /// Not enough units on hand. Nothing was reserved.
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },

    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    #[error("Invalid price: {price} (must not be negative)")]
    InvalidPrice { price: Money },

    #[error("Reservation {0} already exists")]
    DuplicateReservation(ReservationId),
}
