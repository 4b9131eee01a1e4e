//! Product domain events.

use chrono::{DateTime, Utc};
use common::{ProductId, ReservationId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::value_objects::Money;

/// Events that can occur on a product stock record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProductEvent {
    /// Product was added to the catalog with its opening stock.
    ProductRegistered {
        product_id: ProductId,
        name: String,
        unit_price: Money,
        initial_stock: u32,
        registered_at: DateTime<Utc>,
    },

    /// Units were set aside for a reservation.
    StockReserved {
        reservation_id: ReservationId,
        quantity: u32,
        remaining: u32,
    },

    /// A reservation was returned to available stock.
    StockReleased {
        reservation_id: ReservationId,
        quantity: u32,
        available: u32,
    },

    /// A reservation became a permanent sale.
    ReservationCommitted {
        reservation_id: ReservationId,
        quantity: u32,
    },

    StockRestocked { quantity: u32, available: u32 },

    PriceChanged { old_price: Money, new_price: Money },

    ProductActivated,

    ProductDeactivated,
}

impl DomainEvent for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductRegistered { .. } => "ProductRegistered",
            ProductEvent::StockReserved { .. } => "StockReserved",
            ProductEvent::StockReleased { .. } => "StockReleased",
            ProductEvent::ReservationCommitted { .. } => "ReservationCommitted",
            ProductEvent::StockRestocked { .. } => "StockRestocked",
            ProductEvent::PriceChanged { .. } => "PriceChanged",
            ProductEvent::ProductActivated => "ProductActivated",
            ProductEvent::ProductDeactivated => "ProductDeactivated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_event_serialization() {
        let reservation_id = ReservationId::new();
        let event = ProductEvent::StockReserved {
            reservation_id,
            quantity: 3,
            remaining: 7,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("StockReserved"));

        let deserialized: ProductEvent = serde_json::from_str(&json).unwrap();
        match deserialized {
            ProductEvent::StockReserved {
                reservation_id: id,
                quantity,
                remaining,
            } => {
                assert_eq!(id, reservation_id);
                assert_eq!(quantity, 3);
                assert_eq!(remaining, 7);
            }
            other => panic!("Expected StockReserved, got {other:?}"),
        }
    }

    #[test]
    fn test_unit_variant_serialization() {
        let json = serde_json::to_string(&ProductEvent::ProductDeactivated).unwrap();
        let deserialized: ProductEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.event_type(), "ProductDeactivated");
    }
}
