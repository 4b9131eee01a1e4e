//! Order aggregate implementation.

use std::fmt;

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::product::ReservationToken;
use crate::value_objects::{Address, ContactInfo, Money, PaymentMethod};

use super::{
    LineItem, NewOrder, OrderError, OrderEvent, OrderStatus, ReservationSettlement,
    events::OrderStagedData,
};

/// Where an order is in its two-step creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderPhase {
    /// Written, waiting for its payment and shipment. Invisible to readers.
    #[default]
    Staged,
    Confirmed,
    /// Rolled back during checkout. Never visible.
    Discarded,
}

impl fmt::Display for OrderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderPhase::Staged => f.write_str("staged"),
            OrderPhase::Confirmed => f.write_str("confirmed"),
            OrderPhase::Discarded => f.write_str("discarded"),
        }
    }
}

/// Order aggregate root.
///
/// Line items, addresses and totals are frozen when the order is staged.
/// Afterwards only the status and the reservation settlement change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    user_id: Option<UserId>,

    items: Vec<LineItem>,

    shipping_address: Address,

    billing_address: Address,

    payment_method: PaymentMethod,

    total: Money,

    contact: ContactInfo,

    payment_id: Option<AggregateId>,

    shipment_id: Option<AggregateId>,

    reservations: Vec<ReservationToken>,

    phase: OrderPhase,

    status: OrderStatus,

    settlement: Option<ReservationSettlement>,

    placed_at: Option<DateTime<Utc>>,

    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
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
        self.id.is_some() && self.phase == OrderPhase::Confirmed
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderStaged(data) => self.apply_staged(data),
            OrderEvent::OrderConfirmed(data) => {
                self.phase = OrderPhase::Confirmed;
                self.status = OrderStatus::Pending;
                self.updated_at = Some(data.confirmed_at);
            }
            OrderEvent::OrderDiscarded(data) => {
                self.phase = OrderPhase::Discarded;
                self.updated_at = Some(data.discarded_at);
            }
            OrderEvent::StatusChanged(data) => {
                self.status = data.to;
                self.updated_at = Some(data.changed_at);
            }
            OrderEvent::ReservationsSettled(data) => {
                self.settlement = Some(data.settlement);
            }
        }
    }
}

impl Order {
    fn apply_staged(&mut self, data: OrderStagedData) {
        self.id = Some(data.order_id);
        self.user_id = Some(data.user_id);
        self.items = data.items;
        self.shipping_address = data.shipping_address;
        self.billing_address = data.billing_address;
        self.payment_method = data.payment_method;
        self.total = data.total;
        self.contact = data.contact;
        self.payment_id = Some(data.payment_id);
        self.shipment_id = Some(data.shipment_id);
        self.reservations = data.reservations;
        self.phase = OrderPhase::Staged;
        self.status = OrderStatus::Pending;
        self.placed_at = Some(data.staged_at);
        self.updated_at = Some(data.staged_at);
    }
}

// Query methods
impl Order {
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn shipping_address(&self) -> &Address {
        &self.shipping_address
    }

    pub fn billing_address(&self) -> &Address {
        &self.billing_address
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    pub fn payment_id(&self) -> Option<AggregateId> {
        self.payment_id
    }

    pub fn shipment_id(&self) -> Option<AggregateId> {
        self.shipment_id
    }

    /// Reservations recorded when the order was staged.
    pub fn reservations(&self) -> &[ReservationToken] {
        &self.reservations
    }

    pub fn phase(&self) -> OrderPhase {
        self.phase
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn settlement(&self) -> Option<ReservationSettlement> {
        self.settlement
    }

    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.placed_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Total units across all lines.
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// True for a cancelled order whose stock has not gone back yet.
    pub fn awaiting_release(&self) -> bool {
        self.status == OrderStatus::Cancelled && self.settlement.is_none()
    }
}

// Command methods (return events)
impl Order {
    /// Writes the order content without making it visible.
    pub fn stage(
        &self,
        order_id: AggregateId,
        order: NewOrder,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyCreated);
        }
        if order.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &order.items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id,
                    quantity: item.quantity,
                });
            }
            if item.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id,
                    price: item.unit_price,
                });
            }
        }
        let total = order.total()?;

        Ok(vec![OrderEvent::order_staged(order_id, order, total)])
    }

    /// Stages and confirms in one step, for writers that commit the
    /// payment and shipment in the same transaction.
    pub fn place(
        &self,
        order_id: AggregateId,
        order: NewOrder,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        let mut events = self.stage(order_id, order)?;
        events.push(OrderEvent::order_confirmed());
        Ok(events)
    }

    pub fn confirm(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_phase(OrderPhase::Staged, "confirm")?;
        Ok(vec![OrderEvent::order_confirmed()])
    }

    /// Rolls back a staged order. Discarding twice is a no-op.
    pub fn discard(&self, reason: impl Into<String>) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() && self.phase == OrderPhase::Discarded {
            return Ok(vec![]);
        }
        self.ensure_phase(OrderPhase::Staged, "discard")?;
        Ok(vec![OrderEvent::order_discarded(reason)])
    }

    /// Moves the order along one legal status edge.
    pub fn transition(&self, target: OrderStatus) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_phase(OrderPhase::Confirmed, "change the status of")?;
        if !self.status.can_transition_to(target) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        Ok(vec![OrderEvent::status_changed(self.status, target)])
    }

    /// Records that the reservations were settled. Only the first
    /// settlement counts; later ones produce no events.
    pub fn settle_reservations(
        &self,
        settlement: ReservationSettlement,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_phase(OrderPhase::Confirmed, "settle reservations of")?;
        if self.settlement.is_some() {
            return Ok(vec![]);
        }

        let expected = match settlement {
            ReservationSettlement::Released => OrderStatus::Cancelled,
            ReservationSettlement::Committed => OrderStatus::Delivered,
        };
        if self.status != expected {
            return Err(OrderError::SettlementMismatch {
                status: self.status,
                settlement,
            });
        }

        Ok(vec![OrderEvent::reservations_settled(settlement)])
    }

    fn ensure_phase(&self, phase: OrderPhase, action: &'static str) -> Result<(), OrderError> {
        if self.id.is_none() || self.phase != phase {
            return Err(OrderError::InvalidPhase {
                phase: self.phase,
                action,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;

    fn new_order() -> NewOrder {
        let product_id = ProductId::new();
        NewOrder {
            user_id: UserId::new(),
            items: vec![LineItem {
                product_id,
                product_name: "Denim jacket".into(),
                quantity: 2,
                unit_price: Money::from_cents(4500),
            }],
            shipping_address: Address::default(),
            billing_address: Address::default(),
            payment_method: PaymentMethod::Card,
            contact: ContactInfo::new("kai@example.com", "555-0101"),
            payment_id: AggregateId::new(),
            shipment_id: AggregateId::new(),
            reservations: vec![ReservationToken::new(product_id, 2)],
        }
    }

    fn placed() -> Order {
        let mut order = Order::default();
        let events = order.place(AggregateId::new(), new_order()).unwrap();
        order.apply_events(events);
        order
    }

    fn with_status(path: &[OrderStatus]) -> Order {
        let mut order = placed();
        for status in path {
            let events = order.transition(*status).unwrap();
            order.apply_events(events);
        }
        order
    }

    #[test]
    fn test_staged_order_is_invisible() {
        let mut order = Order::default();
        let events = order.stage(AggregateId::new(), new_order()).unwrap();
        order.apply_events(events);

        assert!(order.id().is_some());
        assert_eq!(order.phase(), OrderPhase::Staged);
        assert!(!order.is_visible());
    }

    #[test]
    fn test_place_confirms_with_total() {
        let order = placed();

        assert!(order.is_visible());
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.total(), Money::from_cents(9000));
        assert_eq!(order.total_quantity(), 2);
        assert_eq!(order.reservations().len(), 1);
        assert!(order.payment_id().is_some());
        assert!(order.shipment_id().is_some());
    }

    #[test]
    fn test_stage_twice_fails() {
        let order = placed();
        let result = order.stage(AggregateId::new(), new_order());
        assert_eq!(result.unwrap_err(), OrderError::AlreadyCreated);
    }

    #[test]
    fn test_stage_rejects_empty_and_zero_quantity() {
        let mut empty = new_order();
        empty.items.clear();
        assert_eq!(
            Order::default().stage(AggregateId::new(), empty).unwrap_err(),
            OrderError::NoItems
        );

        let mut zero = new_order();
        zero.items[0].quantity = 0;
        assert!(matches!(
            Order::default().stage(AggregateId::new(), zero),
            Err(OrderError::InvalidQuantity { quantity: 0, .. })
        ));
    }

    #[test]
    fn test_stage_rejects_total_that_overflows() {
        let mut huge = new_order();
        huge.items[0].unit_price = Money::from_cents(i64::MAX / 2);
        huge.items[0].quantity = 3;

        assert_eq!(
            Order::default().stage(AggregateId::new(), huge).unwrap_err(),
            OrderError::TotalOverflow
        );
    }

    #[test]
    fn test_discard_only_from_staged() {
        let mut order = Order::default();
        let events = order.stage(AggregateId::new(), new_order()).unwrap();
        order.apply_events(events);

        let events = order.discard("shipment write failed").unwrap();
        order.apply_events(events);

        assert_eq!(order.phase(), OrderPhase::Discarded);
        assert!(!order.is_visible());
        assert!(order.discard("again").unwrap().is_empty());
        assert!(order.confirm().is_err());

        assert!(matches!(
            placed().discard("too late"),
            Err(OrderError::InvalidPhase {
                phase: OrderPhase::Confirmed,
                ..
            })
        ));
    }

    #[test]
    fn test_pending_cannot_skip_to_shipped() {
        let order = placed();
        assert_eq!(
            order.transition(OrderStatus::Shipped).unwrap_err(),
            OrderError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Shipped
            }
        );
    }

    #[test]
    fn test_full_happy_path() {
        let order = with_status(&[
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ]);
        assert_eq!(order.status(), OrderStatus::Delivered);
        assert!(order.transition(OrderStatus::Cancelled).is_err());
    }

    #[test]
    fn test_shipped_order_cannot_be_cancelled() {
        let order = with_status(&[OrderStatus::Processing, OrderStatus::Shipped]);
        assert!(matches!(
            order.transition(OrderStatus::Cancelled),
            Err(OrderError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_staged_order_cannot_transition() {
        let mut order = Order::default();
        let events = order.stage(AggregateId::new(), new_order()).unwrap();
        order.apply_events(events);

        assert!(matches!(
            order.transition(OrderStatus::Processing),
            Err(OrderError::InvalidPhase { .. })
        ));
    }

    #[test]
    fn test_release_settlement_happens_once() {
        let mut order = with_status(&[OrderStatus::Processing, OrderStatus::Cancelled]);
        assert!(order.awaiting_release());

        let events = order
            .settle_reservations(ReservationSettlement::Released)
            .unwrap();
        assert_eq!(events.len(), 1);
        order.apply_events(events);

        assert!(!order.awaiting_release());
        assert!(
            order
                .settle_reservations(ReservationSettlement::Released)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_settlement_must_match_status() {
        let order = placed();
        assert!(matches!(
            order.settle_reservations(ReservationSettlement::Released),
            Err(OrderError::SettlementMismatch { .. })
        ));

        let delivered = with_status(&[
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ]);
        assert!(
            delivered
                .settle_reservations(ReservationSettlement::Committed)
                .is_ok()
        );
    }
}
