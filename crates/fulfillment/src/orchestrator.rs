//! Checkout: reserve stock, then persist order, payment and shipment.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use common::{AggregateId, ProductId, UserId};
use domain::{
    Address, Aggregate, ContactInfo, LineItem, NewOrder, NewPayment, NewShipment, Order, OrderService,
    Payment, PaymentAuthorization, PaymentMethod, PaymentService, ReservationToken, Shipment,
    ShipmentService, ShippingMethod,
};
use event_store::EventStore;

use crate::checkout::{
    CheckoutSaga, STEP_COMMIT_ORDER, STEP_CONFIRM_ORDER, STEP_RECORD_PAYMENT,
    STEP_RECORD_SHIPMENT, STEP_STAGE_ORDER,
};
use crate::config::{CommitMode, FulfillmentConfig};
use crate::error::FulfillmentError;
use crate::ledger::{InventoryLedger, Reservation, ReservationRequest};

/// One requested cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// A checkout request. Prices are never taken from the caller.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub user_id: UserId,
    pub items: Vec<OrderLine>,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub payment_method: PaymentMethod,
    /// Gateway authorization obtained by the client, if any.
    pub payment_details: Option<PaymentAuthorization>,
    pub contact: ContactInfo,
    pub shipping_method: ShippingMethod,
}

/// The records created by a successful checkout.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    pub payment: Payment,
    pub shipment: Shipment,
}

struct Checkout {
    order_id: AggregateId,
    payment_id: AggregateId,
    shipment_id: AggregateId,
    order: NewOrder,
    payment: NewPayment,
    shipment: NewShipment,
}

/// Coordinates checkouts.
///
/// Stock is reserved first. Then the order, its payment and its shipment are
/// written either in one atomic append or as a saga of single-record steps
/// whose completed steps are undone on failure. Whenever the records cannot
/// all be written, the reservations are released before the error is
/// returned, so a failed checkout never holds stock.
pub struct OrderOrchestrator<S: EventStore, L: InventoryLedger> {
    store: S,
    ledger: Arc<L>,
    orders: OrderService<S>,
    payments: PaymentService<S>,
    shipments: ShipmentService<S>,
    commit_mode: CommitMode,
    currency: String,
}

impl<S, L> OrderOrchestrator<S, L>
where
    S: EventStore + Clone,
    L: InventoryLedger,
{
    pub fn new(store: S, ledger: Arc<L>, config: &FulfillmentConfig) -> Self {
        Self {
            orders: OrderService::new(store.clone()),
            payments: PaymentService::new(store.clone()),
            shipments: ShipmentService::new(store.clone()),
            store,
            ledger,
            commit_mode: config.commit_mode,
            currency: config.currency.clone(),
        }
    }

    pub fn commit_mode(&self) -> CommitMode {
        self.commit_mode
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Places an order.
    ///
    /// Fails with `InvalidInput` for a malformed request or a total too
    /// large to represent, with the ledger's error if stock cannot be
    /// reserved, and with a retryable
    /// `PersistenceFailure` if the records cannot be written. In every
    /// failure case no stock stays reserved and no order becomes visible.
    #[tracing::instrument(
        skip(self, request),
        fields(user_id = %request.user_id, lines = request.items.len(), mode = %self.commit_mode)
    )]
    pub async fn place_order(&self, request: PlaceOrder) -> Result<PlacedOrder, FulfillmentError> {
        let started = Instant::now();
        let result = self.try_place_order(request).await;
        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(placed) => {
                metrics::counter!("orders_placed_total", "mode" => self.commit_mode.as_str())
                    .increment(1);
                tracing::info!(
                    order_id = ?placed.order.id(),
                    total = %placed.order.total(),
                    "order placed"
                );
            }
            Err(err) => {
                metrics::counter!("orders_failed_total", "reason" => err.kind()).increment(1);
                tracing::info!(error = %err, "order rejected");
            }
        }

        result
    }

    async fn try_place_order(&self, request: PlaceOrder) -> Result<PlacedOrder, FulfillmentError> {
        let lines = validate(&request)?;
        let reservations = self.ledger.reserve_batch(&lines).await?;
        let tokens: Vec<ReservationToken> = reservations.iter().map(|r| r.token).collect();

        let committed = match self.build_checkout(request, &reservations) {
            Ok(checkout) => match self.commit_mode {
                CommitMode::Transactional => self.commit_atomically(checkout).await,
                CommitMode::Saga => self.commit_saga(checkout).await,
            },
            Err(err) => Err(err),
        };

        if committed.is_err() {
            metrics::counter!("compensations_total", "step" => "release_stock").increment(1);
            let released = self.ledger.release_all(&tokens).await;
            tracing::warn!(released, "checkout failed after reservation, stock released");
        }
        committed
    }

    fn build_checkout(
        &self,
        request: PlaceOrder,
        reservations: &[Reservation],
    ) -> Result<Checkout, FulfillmentError> {
        let order_id = AggregateId::new();
        let payment_id = AggregateId::new();
        let shipment_id = AggregateId::new();

        let items = reservations
            .iter()
            .map(|r| LineItem {
                product_id: r.token.product_id,
                product_name: r.product_name.clone(),
                quantity: r.token.quantity,
                unit_price: r.unit_price,
            })
            .collect();

        let order = NewOrder {
            user_id: request.user_id,
            items,
            shipping_address: request.shipping_address.clone(),
            billing_address: request.billing_address,
            payment_method: request.payment_method,
            contact: request.contact,
            payment_id,
            shipment_id,
            reservations: reservations.iter().map(|r| r.token).collect(),
        };
        let amount = order.total().map_err(|e| FulfillmentError::InvalidInput(e.to_string()))?;
        let payment = NewPayment {
            order_id,
            method: request.payment_method,
            amount,
            currency: self.currency.clone(),
            authorization: request.payment_details,
        };
        let shipment = NewShipment {
            order_id,
            address: request.shipping_address,
            method: request.shipping_method,
        };

        Ok(Checkout {
            order_id,
            payment_id,
            shipment_id,
            order,
            payment,
            shipment,
        })
    }

    async fn commit_atomically(&self, checkout: Checkout) -> Result<PlacedOrder, FulfillmentError> {
        let step = STEP_COMMIT_ORDER;
        let order = self
            .orders
            .prepare_place(checkout.order_id, checkout.order)
            .await
            .map_err(|e| FulfillmentError::from_domain(step, e))?;
        let payment = self
            .payments
            .prepare_record(checkout.payment_id, checkout.payment)
            .await
            .map_err(|e| FulfillmentError::from_domain(step, e))?;
        let shipment = self
            .shipments
            .prepare_record(checkout.shipment_id, checkout.shipment)
            .await
            .map_err(|e| FulfillmentError::from_domain(step, e))?;

        let versions = self
            .store
            .append_atomic(vec![
                order.batch.clone(),
                payment.batch.clone(),
                shipment.batch.clone(),
            ])
            .await
            .map_err(|e| FulfillmentError::persistence(step, e))?;

        let [order_version, payment_version, shipment_version] = versions[..] else {
            return Err(FulfillmentError::persistence(
                step,
                format!("expected 3 stream versions, store returned {}", versions.len()),
            ));
        };

        Ok(PlacedOrder {
            order: order.committed(order_version).aggregate,
            payment: payment.committed(payment_version).aggregate,
            shipment: shipment.committed(shipment_version).aggregate,
        })
    }

    async fn commit_saga(&self, checkout: Checkout) -> Result<PlacedOrder, FulfillmentError> {
        let Checkout {
            order_id,
            payment_id,
            shipment_id,
            order,
            payment,
            shipment,
        } = checkout;
        let mut saga = CheckoutSaga::new();

        let step = STEP_STAGE_ORDER;
        if let Err(e) = self.orders.stage(order_id, order).await {
            return Err(self.abort(&mut saga, step, e, order_id, payment_id, shipment_id).await);
        }
        saga.step_completed(step);

        let step = STEP_RECORD_PAYMENT;
        let payment = match self.payments.record(payment_id, payment).await {
            Ok(result) => result.aggregate,
            Err(e) => {
                return Err(self.abort(&mut saga, step, e, order_id, payment_id, shipment_id).await);
            }
        };
        saga.step_completed(step);

        let step = STEP_RECORD_SHIPMENT;
        let shipment = match self.shipments.record(shipment_id, shipment).await {
            Ok(result) => result.aggregate,
            Err(e) => {
                return Err(self.abort(&mut saga, step, e, order_id, payment_id, shipment_id).await);
            }
        };
        saga.step_completed(step);

        let step = STEP_CONFIRM_ORDER;
        let order = match self.orders.confirm(order_id).await {
            Ok(result) => result.aggregate,
            Err(e) => {
                return Err(self.abort(&mut saga, step, e, order_id, payment_id, shipment_id).await);
            }
        };
        saga.step_completed(step);
        saga.finish();

        Ok(PlacedOrder {
            order,
            payment,
            shipment,
        })
    }

    /// Undoes completed saga steps newest first and returns the error to
    /// surface. Undo failures are logged; a record left behind stays
    /// invisible because its order never gets confirmed.
    async fn abort(
        &self,
        saga: &mut CheckoutSaga,
        failed_step: &'static str,
        error: domain::DomainError,
        order_id: AggregateId,
        payment_id: AggregateId,
        shipment_id: AggregateId,
    ) -> FulfillmentError {
        tracing::warn!(step = failed_step, %order_id, error = %error, "checkout step failed, compensating");
        let reason = format!("checkout aborted at {failed_step}");

        for step in saga.step_failed(failed_step) {
            let undone = match step {
                STEP_RECORD_SHIPMENT => self
                    .shipments
                    .discard(shipment_id, reason.clone())
                    .await
                    .map(|_| ()),
                STEP_RECORD_PAYMENT => self
                    .payments
                    .discard(payment_id, reason.clone())
                    .await
                    .map(|_| ()),
                STEP_STAGE_ORDER => self.orders.discard(order_id, reason.clone()).await.map(|_| ()),
                _ => Ok(()),
            };

            match undone {
                Ok(()) => {
                    metrics::counter!("compensations_total", "step" => step).increment(1);
                }
                Err(e) => {
                    metrics::counter!("compensation_failures_total", "step" => step).increment(1);
                    tracing::error!(step, %order_id, error = %e, "compensation step failed");
                }
            }
        }
        saga.finish();

        FulfillmentError::from_domain(failed_step, error)
    }

    /// Gets a placed order.
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Order, FulfillmentError> {
        self.orders
            .get_order(order_id)
            .await
            .map_err(|e| FulfillmentError::persistence("load_order", e))?
            .ok_or(FulfillmentError::OrderNotFound(order_id))
    }

    /// Orders placed by a user, oldest first.
    pub async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, FulfillmentError> {
        self.orders
            .list_for_user(user_id)
            .await
            .map_err(|e| FulfillmentError::persistence("list_orders", e))
    }

    /// Every placed order, oldest first.
    pub async fn list_all_orders(&self) -> Result<Vec<Order>, FulfillmentError> {
        self.orders
            .list_all()
            .await
            .map_err(|e| FulfillmentError::persistence("list_orders", e))
    }

    /// The payment owned by an order.
    pub async fn get_payment(&self, order_id: AggregateId) -> Result<Payment, FulfillmentError> {
        let order = self.get_order(order_id).await?;
        let payment_id = order
            .payment_id()
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;
        self.payments
            .get_payment(payment_id)
            .await
            .map_err(|e| FulfillmentError::persistence("load_payment", e))?
            .ok_or_else(|| FulfillmentError::persistence("load_payment", "payment record missing"))
    }

    /// The shipment owned by an order.
    pub async fn get_shipment(&self, order_id: AggregateId) -> Result<Shipment, FulfillmentError> {
        let order = self.get_order(order_id).await?;
        let shipment_id = order
            .shipment_id()
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;
        self.shipments
            .get_shipment(shipment_id)
            .await
            .map_err(|e| FulfillmentError::persistence("load_shipment", e))?
            .ok_or_else(|| FulfillmentError::persistence("load_shipment", "shipment record missing"))
    }
}

/// Checks the request and merges repeated products into one line each.
fn validate(request: &PlaceOrder) -> Result<Vec<ReservationRequest>, FulfillmentError> {
    if request.items.is_empty() {
        return Err(FulfillmentError::InvalidInput("order has no items".into()));
    }

    let mut merged: BTreeMap<ProductId, u32> = BTreeMap::new();
    for line in &request.items {
        if line.quantity == 0 {
            return Err(FulfillmentError::InvalidInput(format!(
                "quantity for product {} must be at least 1",
                line.product_id
            )));
        }
        let quantity = merged.entry(line.product_id).or_insert(0);
        *quantity = quantity.checked_add(line.quantity).ok_or_else(|| {
            FulfillmentError::InvalidInput(format!("quantity for product {} is too large", line.product_id))
        })?;
    }

    if !request.shipping_address.is_complete() {
        return Err(FulfillmentError::InvalidInput("shipping address is incomplete".into()));
    }
    if !request.billing_address.is_complete() {
        return Err(FulfillmentError::InvalidInput("billing address is incomplete".into()));
    }
    if !request.contact.is_complete() {
        return Err(FulfillmentError::InvalidInput(
            "contact email and phone are required".into(),
        ));
    }

    Ok(merged
        .into_iter()
        .map(|(product_id, quantity)| ReservationRequest::new(product_id, quantity))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address {
            recipient_name: "Ines Duarte".into(),
            line1: "Rua das Flores 21".into(),
            line2: None,
            city: "Porto".into(),
            region: None,
            postal_code: "4050-262".into(),
            country: "PT".into(),
        }
    }

    fn request(items: Vec<OrderLine>) -> PlaceOrder {
        PlaceOrder {
            user_id: UserId::new(),
            items,
            shipping_address: address(),
            billing_address: address(),
            payment_method: PaymentMethod::Card,
            payment_details: None,
            contact: ContactInfo::new("ines@example.com", "+351 22 000 0000"),
            shipping_method: ShippingMethod::Standard,
        }
    }

    #[test]
    fn test_validate_merges_duplicates_in_product_order() {
        let a = ProductId::new();
        let b = ProductId::new();
        let lines = validate(&request(vec![
            OrderLine::new(a, 1),
            OrderLine::new(b, 2),
            OrderLine::new(a, 3),
        ]))
        .unwrap();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].product_id < lines[1].product_id);
        let qty_a = lines.iter().find(|l| l.product_id == a).unwrap().quantity;
        assert_eq!(qty_a, 4);
    }

    #[test]
    fn test_validate_rejects_bad_requests() {
        let product = ProductId::new();

        assert!(matches!(
            validate(&request(vec![])),
            Err(FulfillmentError::InvalidInput(_))
        ));
        assert!(matches!(
            validate(&request(vec![OrderLine::new(product, 0)])),
            Err(FulfillmentError::InvalidInput(_))
        ));
        assert!(matches!(
            validate(&request(vec![
                OrderLine::new(product, u32::MAX),
                OrderLine::new(product, 1)
            ])),
            Err(FulfillmentError::InvalidInput(_))
        ));

        let mut no_contact = request(vec![OrderLine::new(product, 1)]);
        no_contact.contact.email.clear();
        assert!(matches!(
            validate(&no_contact),
            Err(FulfillmentError::InvalidInput(_))
        ));

        let mut no_address = request(vec![OrderLine::new(product, 1)]);
        no_address.shipping_address = Address::default();
        assert!(matches!(
            validate(&no_address),
            Err(FulfillmentError::InvalidInput(_))
        ));
    }
}
