//! Post-checkout order lifecycle: status changes and their side effects.

use std::sync::Arc;

use common::AggregateId;
use domain::{
    Aggregate, DomainError, Order, OrderError, OrderEvent, OrderService, OrderStatus, Payment,
    PaymentAuthorization, PaymentService, ReservationSettlement, Shipment, ShipmentService,
};
use event_store::EventStore;

use crate::config::FulfillmentConfig;
use crate::error::FulfillmentError;
use crate::ledger::InventoryLedger;
use crate::retry::RetryPolicy;

const RETRY_METRIC: &str = "lifecycle_conflicts_total";

/// Drives placed orders through their status graph.
///
/// Status writes that lose a race are retried a bounded number of times.
/// Side effects run after the status change is persisted; if one fails the
/// change stays and a `PersistenceFailure` is returned. The caller then
/// re-runs the side effects with `settle_cancelled_order` or
/// `settle_delivered_order`.
pub struct OrderLifecycle<S: EventStore, L: InventoryLedger> {
    orders: OrderService<S>,
    payments: PaymentService<S>,
    shipments: ShipmentService<S>,
    ledger: Arc<L>,
    retry: RetryPolicy,
}

impl<S, L> OrderLifecycle<S, L>
where
    S: EventStore + Clone,
    L: InventoryLedger,
{
    pub fn new(store: S, ledger: Arc<L>, config: &FulfillmentConfig) -> Self {
        Self {
            orders: OrderService::new(store.clone()),
            payments: PaymentService::new(store.clone()),
            shipments: ShipmentService::new(store),
            ledger,
            retry: RetryPolicy::for_transitions(config),
        }
    }

    /// Moves an order to `target`.
    ///
    /// Shipping dispatches the shipment, delivery commits the reserved
    /// stock and cancellation returns it to the shelf and refunds or voids
    /// the payment.
    #[tracing::instrument(skip(self))]
    pub async fn transition_order_status(
        &self,
        order_id: AggregateId,
        target: OrderStatus,
    ) -> Result<Order, FulfillmentError> {
        let result = self
            .retry
            .run(RETRY_METRIC, move || self.orders.transition(order_id, target))
            .await
            .map_err(|e| transition_error(order_id, e))?;

        let from = result
            .events
            .iter()
            .find_map(|event| match event {
                OrderEvent::StatusChanged(data) => Some(data.from),
                _ => None,
            })
            .unwrap_or(target);
        metrics::counter!(
            "order_transitions_total",
            "from" => from.as_str(),
            "to" => target.as_str()
        )
        .increment(1);
        tracing::info!(%order_id, %from, to = %target, "order status changed");

        let order = result.aggregate;
        match target {
            OrderStatus::Shipped => self.dispatch_shipment(&order).await?,
            OrderStatus::Delivered => return self.complete_delivery(order).await,
            OrderStatus::Cancelled => return self.complete_cancellation(order).await,
            OrderStatus::Pending | OrderStatus::Processing => {}
        }

        Ok(order)
    }

    /// Returns a cancelled order's stock to the shelf.
    ///
    /// Safe to call any number of times: stock is credited only once per
    /// order.
    #[tracing::instrument(skip(self))]
    pub async fn release_cancelled_stock(
        &self,
        order_id: AggregateId,
    ) -> Result<Order, FulfillmentError> {
        let order = self.load_in_status(order_id, OrderStatus::Cancelled).await?;
        self.release_stock(order).await
    }

    /// Re-runs every side effect of a cancellation: returns the stock and
    /// refunds or voids the payment. Each part takes effect at most once,
    /// so this is safe to repeat after a failed cancellation.
    #[tracing::instrument(skip(self))]
    pub async fn settle_cancelled_order(
        &self,
        order_id: AggregateId,
    ) -> Result<Order, FulfillmentError> {
        let order = self.load_in_status(order_id, OrderStatus::Cancelled).await?;
        self.complete_cancellation(order).await
    }

    /// Re-runs the side effects of a delivery: marks the shipment delivered
    /// and commits the reserved stock. Safe to repeat; nothing is committed
    /// twice.
    #[tracing::instrument(skip(self))]
    pub async fn settle_delivered_order(
        &self,
        order_id: AggregateId,
    ) -> Result<Order, FulfillmentError> {
        let order = self.load_in_status(order_id, OrderStatus::Delivered).await?;
        self.complete_delivery(order).await
    }

    /// Records a gateway authorization against the order's payment.
    #[tracing::instrument(skip(self, authorization))]
    pub async fn confirm_payment(
        &self,
        order_id: AggregateId,
        authorization: PaymentAuthorization,
    ) -> Result<Payment, FulfillmentError> {
        let order = self.load_order(order_id).await?;
        let payment_id = order
            .payment_id()
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;

        self.retry
            .run(RETRY_METRIC, move || {
                self.payments.confirm(payment_id, authorization.clone())
            })
            .await
            .map(|result| result.aggregate)
            .map_err(|e| FulfillmentError::from_domain("confirm_payment", e))
    }

    /// Sets the carrier tracking number on the order's shipment.
    #[tracing::instrument(skip(self))]
    pub async fn assign_tracking_number(
        &self,
        order_id: AggregateId,
        tracking_number: String,
    ) -> Result<Shipment, FulfillmentError> {
        let order = self.load_order(order_id).await?;
        let shipment_id = order
            .shipment_id()
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;

        self.retry
            .run(RETRY_METRIC, move || {
                self.shipments
                    .assign_tracking_number(shipment_id, tracking_number.clone())
            })
            .await
            .map(|result| result.aggregate)
            .map_err(|e| FulfillmentError::from_domain("assign_tracking_number", e))
    }

    async fn load_order(&self, order_id: AggregateId) -> Result<Order, FulfillmentError> {
        self.orders
            .get_order(order_id)
            .await
            .map_err(|e| FulfillmentError::persistence("load_order", e))?
            .ok_or(FulfillmentError::OrderNotFound(order_id))
    }

    async fn load_in_status(
        &self,
        order_id: AggregateId,
        status: OrderStatus,
    ) -> Result<Order, FulfillmentError> {
        let order = self.load_order(order_id).await?;
        if order.status() != status {
            return Err(FulfillmentError::InvalidOperation(format!(
                "order {order_id} is {}, expected {status}",
                order.status()
            )));
        }
        Ok(order)
    }

    async fn dispatch_shipment(&self, order: &Order) -> Result<(), FulfillmentError> {
        let Some(shipment_id) = order.shipment_id() else {
            return Ok(());
        };
        self.retry
            .run(RETRY_METRIC, move || self.shipments.dispatch(shipment_id))
            .await
            .map_err(|e| FulfillmentError::persistence("dispatch_shipment", e))?;
        Ok(())
    }

    async fn complete_delivery(&self, order: Order) -> Result<Order, FulfillmentError> {
        let Some(order_id) = order.id() else {
            return Ok(order);
        };

        if let Some(shipment_id) = order.shipment_id() {
            self.retry
                .run(RETRY_METRIC, move || self.shipments.deliver(shipment_id))
                .await
                .map_err(|e| FulfillmentError::persistence("deliver_shipment", e))?;
        }

        if order.settlement().is_some() {
            return Ok(order);
        }
        for token in order.reservations() {
            if let Err(err) = self.ledger.commit(token).await {
                tracing::error!(
                    %order_id,
                    reservation_id = %token.reservation_id,
                    error = %err,
                    "failed to commit stock of delivered order"
                );
                return Err(err);
            }
        }
        self.settle(order_id, ReservationSettlement::Committed).await
    }

    /// Releases the stock and cancels the payment. Both are attempted even
    /// if the first fails; the first error is returned.
    async fn complete_cancellation(&self, order: Order) -> Result<Order, FulfillmentError> {
        let released = self.release_stock(order.clone()).await;
        let cancelled = self.cancel_payment(&order).await;
        let order = released?;
        cancelled?;
        Ok(order)
    }

    async fn release_stock(&self, order: Order) -> Result<Order, FulfillmentError> {
        let Some(order_id) = order.id() else {
            return Ok(order);
        };
        if !order.awaiting_release() {
            tracing::debug!(%order_id, "reservations already settled");
            return Ok(order);
        }

        for token in order.reservations() {
            if let Err(err) = self.ledger.release(token).await {
                metrics::counter!("compensation_failures_total", "step" => "release_stock")
                    .increment(1);
                tracing::error!(
                    %order_id,
                    reservation_id = %token.reservation_id,
                    error = %err,
                    "failed to release stock of cancelled order"
                );
                return Err(err);
            }
        }
        self.settle(order_id, ReservationSettlement::Released).await
    }

    async fn settle(
        &self,
        order_id: AggregateId,
        settlement: ReservationSettlement,
    ) -> Result<Order, FulfillmentError> {
        self.retry
            .run(RETRY_METRIC, move || {
                self.orders.settle_reservations(order_id, settlement)
            })
            .await
            .map(|result| result.aggregate)
            .map_err(|e| FulfillmentError::persistence("settle_reservations", e))
    }

    async fn cancel_payment(&self, order: &Order) -> Result<(), FulfillmentError> {
        let Some(payment_id) = order.payment_id() else {
            return Ok(());
        };
        let payment = self
            .retry
            .run(RETRY_METRIC, move || self.payments.cancel_for_order(payment_id))
            .await
            .map_err(|e| FulfillmentError::persistence("cancel_payment", e))?
            .aggregate;
        tracing::info!(%payment_id, status = ?payment.status(), "payment cancelled with order");
        Ok(())
    }
}

fn transition_error(order_id: AggregateId, error: DomainError) -> FulfillmentError {
    match error {
        DomainError::Order(OrderError::InvalidTransition { from, to }) => {
            FulfillmentError::InvalidTransition { from, to }
        }
        DomainError::Order(OrderError::InvalidPhase { .. }) => {
            FulfillmentError::OrderNotFound(order_id)
        }
        other => FulfillmentError::from_domain("transition_order", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::OrderPhase;

    #[test]
    fn test_transition_error_mapping() {
        let order_id = AggregateId::new();

        let err = transition_error(
            order_id,
            DomainError::Order(OrderError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Shipped,
            }),
        );
        assert!(matches!(
            err,
            FulfillmentError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Shipped
            }
        ));

        let err = transition_error(
            order_id,
            DomainError::Order(OrderError::InvalidPhase {
                phase: OrderPhase::Staged,
                action: "change the status of",
            }),
        );
        assert!(matches!(err, FulfillmentError::OrderNotFound(id) if id == order_id));
    }
}
