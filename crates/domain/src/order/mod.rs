//! Order aggregate and related types.

mod aggregate;
mod events;
mod service;
mod status;

pub use aggregate::{Order, OrderPhase};
pub use events::{
    OrderConfirmedData, OrderDiscardedData, OrderEvent, OrderStagedData, ReservationSettlement,
    ReservationsSettledData, StatusChangedData,
};
pub use service::OrderService;
pub use status::{LEGAL_TRANSITIONS, OrderStatus};

use common::{AggregateId, ProductId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::product::ReservationToken;
use crate::value_objects::{Address, ContactInfo, Money, PaymentMethod};

/// A line of an order, frozen at placement time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    /// Catalog price when the stock was reserved.
    pub unit_price: Money,
}

impl LineItem {
    /// Price times quantity, or `None` if it overflows.
    pub fn total_price(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}

/// Everything needed to stage an order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: UserId,
    pub items: Vec<LineItem>,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub payment_method: PaymentMethod,
    pub contact: ContactInfo,
    pub payment_id: AggregateId,
    pub shipment_id: AggregateId,
    pub reservations: Vec<ReservationToken>,
}

impl NewOrder {
    /// Sum of the line totals. Fails rather than wrapping when an amount
    /// does not fit.
    pub fn total(&self) -> Result<Money, OrderError> {
        self.items.iter().try_fold(Money::zero(), |total, item| {
            item.total_price()
                .and_then(|line| total.checked_add(line))
                .ok_or(OrderError::TotalOverflow)
        })
    }
}

/// Errors that can occur during order operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("Order already created")]
    AlreadyCreated,

    #[error("Order has no items")]
    NoItems,

    #[error("Invalid quantity {quantity} for product {product_id} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    #[error("Invalid price {price} for product {product_id}")]
    InvalidPrice { product_id: ProductId, price: Money },

    #[error("Order total is too large to represent")]
    TotalOverflow,

    /// The order is not in the phase the action requires.
    #[error("Cannot {action} an order that is {phase}")]
    InvalidPhase {
        phase: OrderPhase,
        action: &'static str,
    },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Settlement does not match the order's terminal status.
    #[error("Cannot settle reservations as {settlement} while order is {status}")]
    SettlementMismatch {
        status: OrderStatus,
        settlement: ReservationSettlement,
    },
}
