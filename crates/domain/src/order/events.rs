//! Order domain events.

use std::fmt;

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::product::ReservationToken;
use crate::value_objects::{Address, ContactInfo, Money, PaymentMethod};

use super::{LineItem, NewOrder, OrderStatus};

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order content was written but is not visible yet.
    OrderStaged(OrderStagedData),

    /// Payment and shipment exist; the order is now visible.
    OrderConfirmed(OrderConfirmedData),

    /// A staged order was rolled back and will never become visible.
    OrderDiscarded(OrderDiscardedData),

    StatusChanged(StatusChangedData),

    /// The order's stock reservations were released or committed.
    ReservationsSettled(ReservationsSettledData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderStaged(_) => "OrderStaged",
            OrderEvent::OrderConfirmed(_) => "OrderConfirmed",
            OrderEvent::OrderDiscarded(_) => "OrderDiscarded",
            OrderEvent::StatusChanged(_) => "StatusChanged",
            OrderEvent::ReservationsSettled(_) => "ReservationsSettled",
        }
    }
}

/// Data for OrderStaged event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStagedData {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub items: Vec<LineItem>,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub payment_method: PaymentMethod,
    pub total: Money,
    pub contact: ContactInfo,
    pub payment_id: AggregateId,
    pub shipment_id: AggregateId,
    /// Reservations backing the line items, released or committed later.
    pub reservations: Vec<ReservationToken>,
    pub staged_at: DateTime<Utc>,
}

/// Data for OrderConfirmed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmedData {
    pub confirmed_at: DateTime<Utc>,
}

/// Data for OrderDiscarded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDiscardedData {
    pub reason: String,
    pub discarded_at: DateTime<Utc>,
}

/// Data for StatusChanged event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangedData {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub changed_at: DateTime<Utc>,
}

/// How an order's reservations were settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationSettlement {
    /// Stock went back to the shelf.
    Released,
    /// Stock left the warehouse for good.
    Committed,
}

impl fmt::Display for ReservationSettlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationSettlement::Released => f.write_str("released"),
            ReservationSettlement::Committed => f.write_str("committed"),
        }
    }
}

/// Data for ReservationsSettled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationsSettledData {
    pub settlement: ReservationSettlement,
    pub settled_at: DateTime<Utc>,
}

// Convenience constructors for events
impl OrderEvent {
    pub fn order_staged(order_id: AggregateId, order: NewOrder, total: Money) -> Self {
        OrderEvent::OrderStaged(OrderStagedData {
            order_id,
            user_id: order.user_id,
            items: order.items,
            shipping_address: order.shipping_address,
            billing_address: order.billing_address,
            payment_method: order.payment_method,
            total,
            contact: order.contact,
            payment_id: order.payment_id,
            shipment_id: order.shipment_id,
            reservations: order.reservations,
            staged_at: Utc::now(),
        })
    }

    pub fn order_confirmed() -> Self {
        OrderEvent::OrderConfirmed(OrderConfirmedData {
            confirmed_at: Utc::now(),
        })
    }

    pub fn order_discarded(reason: impl Into<String>) -> Self {
        OrderEvent::OrderDiscarded(OrderDiscardedData {
            reason: reason.into(),
            discarded_at: Utc::now(),
        })
    }

    pub fn status_changed(from: OrderStatus, to: OrderStatus) -> Self {
        OrderEvent::StatusChanged(StatusChangedData {
            from,
            to,
            changed_at: Utc::now(),
        })
    }

    pub fn reservations_settled(settlement: ReservationSettlement) -> Self {
        OrderEvent::ReservationsSettled(ReservationsSettledData {
            settlement,
            settled_at: Utc::now(),
        })
    }
}
