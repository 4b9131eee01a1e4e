//! Inventory ledger: atomic stock reservation and release.

use async_trait::async_trait;
use common::{ProductId, ReservationId};
use domain::{CatalogService, DomainError, Money, ProductError, ReservationToken};
use event_store::EventStore;

use crate::config::FulfillmentConfig;
use crate::error::FulfillmentError;
use crate::retry::RetryPolicy;

const STEP_RESERVE: &str = "reserve_stock";
const STEP_RELEASE: &str = "release_stock";
const STEP_COMMIT: &str = "commit_stock";

/// One line of a batch reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl ReservationRequest {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// A successful reservation together with the catalog data seen when it
/// was taken.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub token: ReservationToken,
    pub product_name: String,
    /// Catalog price at reservation time; order totals are computed from it.
    pub unit_price: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Stock was credited back.
    Released,
    /// The reservation was already released or committed; nothing changed.
    AlreadySettled,
}

/// Per-product stock counters with atomic check-and-decrement.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Reserves `quantity` units, or fails without touching stock.
    async fn reserve(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Reservation, FulfillmentError>;

    /// Credits a reservation back. A token is only ever credited once.
    async fn release(&self, token: &ReservationToken) -> Result<ReleaseOutcome, FulfillmentError>;

    /// Settles a reservation as sold. It can no longer be released.
    async fn commit(&self, token: &ReservationToken) -> Result<(), FulfillmentError>;

    /// Reserves every item or none.
    ///
    /// Items are taken in ascending product order regardless of input order.
    /// On the first failure every reservation already made is released and
    /// that failure is returned.
    async fn reserve_batch(
        &self,
        items: &[ReservationRequest],
    ) -> Result<Vec<Reservation>, FulfillmentError> {
        let mut ordered = items.to_vec();
        ordered.sort_by_key(|item| item.product_id);

        let mut reserved: Vec<Reservation> = Vec::with_capacity(ordered.len());
        for item in ordered {
            match self.reserve(item.product_id, item.quantity).await {
                Ok(reservation) => reserved.push(reservation),
                Err(err) => {
                    let tokens: Vec<ReservationToken> = reserved.iter().map(|r| r.token).collect();
                    self.release_all(&tokens).await;
                    return Err(err);
                }
            }
        }

        Ok(reserved)
    }

    /// Releases every token, logging the ones that could not be released.
    /// Returns how many were still outstanding.
    async fn release_all(&self, tokens: &[ReservationToken]) -> usize {
        let mut released = 0;
        for token in tokens {
            match self.release(token).await {
                Ok(ReleaseOutcome::Released) => released += 1,
                Ok(ReleaseOutcome::AlreadySettled) => {}
                Err(err) => {
                    metrics::counter!("compensation_failures_total", "step" => STEP_RELEASE)
                        .increment(1);
                    tracing::error!(
                        reservation_id = %token.reservation_id,
                        product_id = %token.product_id,
                        quantity = token.quantity,
                        error = %err,
                        "failed to release reservation"
                    );
                }
            }
        }
        released
    }
}

/// Inventory ledger backed by event-sourced product records.
///
/// A reservation is decided against the loaded stock count and appended
/// with the loaded stream version as its expected version, so the check
/// and the decrement succeed or fail together. Losing a race means reloading
/// and deciding again; a reservation that cannot win within the configured
/// timeout fails closed as out of stock.
pub struct StockLedger<S: EventStore> {
    catalog: CatalogService<S>,
    retry: RetryPolicy,
    timeout: std::time::Duration,
}

impl<S: EventStore> StockLedger<S> {
    pub fn new(store: S, config: &FulfillmentConfig) -> Self {
        Self {
            catalog: CatalogService::new(store),
            retry: RetryPolicy::for_reservations(config),
            timeout: config.reservation_timeout,
        }
    }

    /// The catalog this ledger writes through.
    pub fn catalog(&self) -> &CatalogService<S> {
        &self.catalog
    }

    /// Units currently available for a product.
    pub async fn available(&self, product_id: ProductId) -> Result<u32, FulfillmentError> {
        self.catalog
            .get_product(product_id)
            .await
            .map_err(|e| FulfillmentError::persistence("load_product", e))?
            .map(|product| product.available())
            .ok_or(FulfillmentError::ProductNotFound { product_id })
    }
}

#[async_trait]
impl<S: EventStore> InventoryLedger for StockLedger<S> {
    #[tracing::instrument(skip(self))]
    async fn reserve(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Reservation, FulfillmentError> {
        let reservation_id = ReservationId::new();
        let attempt = self.retry.run("reservation_conflicts_total", move || {
            self.catalog.reserve(product_id, reservation_id, quantity)
        });

        let result = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                let err = reservation_error(product_id, quantity, err);
                metrics::counter!("reservation_failures_total", "reason" => err.kind())
                    .increment(1);
                return Err(err);
            }
            Err(_) => {
                metrics::counter!("reservation_failures_total", "reason" => "timeout")
                    .increment(1);
                tracing::warn!(%product_id, quantity, timeout = ?self.timeout, "reservation timed out");
                return Err(FulfillmentError::OutOfStock {
                    product_id,
                    requested: quantity,
                    available: None,
                });
            }
        };

        self.catalog.snapshot_if_due(product_id, &result).await;
        let product = result.aggregate;

        metrics::counter!("reservations_total").increment(1);
        tracing::debug!(%product_id, quantity, remaining = product.available(), "stock reserved");

        Ok(Reservation {
            token: ReservationToken {
                reservation_id,
                product_id,
                quantity,
            },
            product_name: product.name().to_string(),
            unit_price: product.unit_price(),
        })
    }

    #[tracing::instrument(skip(self), fields(reservation_id = %token.reservation_id))]
    async fn release(&self, token: &ReservationToken) -> Result<ReleaseOutcome, FulfillmentError> {
        let (product_id, reservation_id) = (token.product_id, token.reservation_id);
        let attempt = self.retry.run("reservation_conflicts_total", move || {
            self.catalog.release(product_id, reservation_id)
        });

        let result = tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| FulfillmentError::persistence(STEP_RELEASE, "timed out"))?
            .map_err(|e| settle_error(STEP_RELEASE, product_id, e))?;
        self.catalog.snapshot_if_due(product_id, &result).await;

        if result.events.is_empty() {
            tracing::debug!(%product_id, "reservation already settled");
            return Ok(ReleaseOutcome::AlreadySettled);
        }

        tracing::debug!(%product_id, available = result.aggregate.available(), "stock released");
        Ok(ReleaseOutcome::Released)
    }

    #[tracing::instrument(skip(self), fields(reservation_id = %token.reservation_id))]
    async fn commit(&self, token: &ReservationToken) -> Result<(), FulfillmentError> {
        let (product_id, reservation_id) = (token.product_id, token.reservation_id);
        let attempt = self.retry.run("reservation_conflicts_total", move || {
            self.catalog.commit(product_id, reservation_id)
        });

        let result = tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| FulfillmentError::persistence(STEP_COMMIT, "timed out"))?
            .map_err(|e| settle_error(STEP_COMMIT, product_id, e))?;
        self.catalog.snapshot_if_due(product_id, &result).await;

        Ok(())
    }
}

fn reservation_error(product_id: ProductId, quantity: u32, error: DomainError) -> FulfillmentError {
    match error {
        DomainError::Product(ProductError::NotRegistered) => {
            FulfillmentError::ProductNotFound { product_id }
        }
        DomainError::Product(ProductError::Inactive) => {
            FulfillmentError::InactiveProduct { product_id }
        }
        DomainError::Product(ProductError::InsufficientStock {
            requested,
            available,
        }) => FulfillmentError::OutOfStock {
            product_id,
            requested,
            available: Some(available),
        },
        DomainError::Product(ProductError::InvalidQuantity { .. }) => FulfillmentError::InvalidInput(
            format!("quantity {quantity} for product {product_id} must be at least 1"),
        ),
        other => FulfillmentError::persistence(STEP_RESERVE, other),
    }
}

fn settle_error(step: &'static str, product_id: ProductId, error: DomainError) -> FulfillmentError {
    match error {
        DomainError::Product(ProductError::NotRegistered) => {
            FulfillmentError::ProductNotFound { product_id }
        }
        other => FulfillmentError::persistence(step, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use common::AggregateId;
    use event_store::{
        AppendBatch, AppendOptions, EventEnvelope, EventStoreError, InMemoryEventStore, Snapshot,
        Version,
    };

    /// Store whose product appends lose every race while `contended` is set.
    #[derive(Clone, Default)]
    struct ContendedStore {
        inner: InMemoryEventStore,
        contended: Arc<AtomicBool>,
    }

    impl ContendedStore {
        fn lost_race(
            &self,
            events: &[EventEnvelope],
            options: AppendOptions,
        ) -> event_store::Result<()> {
            let Some(first) = events.first() else {
                return Ok(());
            };
            if first.aggregate_type == "Product" && self.contended.load(Ordering::SeqCst) {
                let expected = options.expected_version.unwrap_or_default();
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: first.aggregate_id,
                    expected,
                    actual: expected.next(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EventStore for ContendedStore {
        async fn append(
            &self,
            events: Vec<EventEnvelope>,
            options: AppendOptions,
        ) -> event_store::Result<Version> {
            self.lost_race(&events, options)?;
            self.inner.append(events, options).await
        }

        async fn append_atomic(
            &self,
            batches: Vec<AppendBatch>,
        ) -> event_store::Result<Vec<Version>> {
            for batch in &batches {
                self.lost_race(&batch.events, batch.options)?;
            }
            self.inner.append_atomic(batches).await
        }

        async fn get_events_for_aggregate(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Vec<EventEnvelope>> {
            self.inner.get_events_for_aggregate(aggregate_id).await
        }

        async fn get_events_for_aggregate_from_version(
            &self,
            aggregate_id: AggregateId,
            from_version: Version,
        ) -> event_store::Result<Vec<EventEnvelope>> {
            self.inner
                .get_events_for_aggregate_from_version(aggregate_id, from_version)
                .await
        }

        async fn get_events_by_type(
            &self,
            event_type: &str,
        ) -> event_store::Result<Vec<EventEnvelope>> {
            self.inner.get_events_by_type(event_type).await
        }

        async fn get_aggregate_version(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Option<Version>> {
            self.inner.get_aggregate_version(aggregate_id).await
        }

        async fn save_snapshot(&self, snapshot: Snapshot) -> event_store::Result<()> {
            self.inner.save_snapshot(snapshot).await
        }

        async fn get_snapshot(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Option<Snapshot>> {
            self.inner.get_snapshot(aggregate_id).await
        }
    }

    async fn ledger_with(stock: &[u32]) -> (StockLedger<InMemoryEventStore>, Vec<ProductId>) {
        let ledger = StockLedger::new(InMemoryEventStore::new(), &FulfillmentConfig::default());
        let mut ids = Vec::new();
        for (i, units) in stock.iter().enumerate() {
            let product_id = ProductId::new();
            ledger
                .catalog()
                .register(
                    product_id,
                    format!("item-{i}"),
                    Money::from_cents(100 * (i as i64 + 1)),
                    *units,
                )
                .await
                .unwrap();
            ids.push(product_id);
        }
        (ledger, ids)
    }

    #[tokio::test]
    async fn test_reserve_returns_token_and_price() {
        let (ledger, ids) = ledger_with(&[5]).await;

        let reservation = ledger.reserve(ids[0], 2).await.unwrap();

        assert_eq!(reservation.token.product_id, ids[0]);
        assert_eq!(reservation.token.quantity, 2);
        assert_eq!(reservation.unit_price, Money::from_cents(100));
        assert_eq!(reservation.product_name, "item-0");
        assert_eq!(ledger.available(ids[0]).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reserve_failures_map_to_taxonomy() {
        let (ledger, ids) = ledger_with(&[2]).await;

        let missing = ProductId::new();
        assert!(matches!(
            ledger.reserve(missing, 1).await,
            Err(FulfillmentError::ProductNotFound { product_id }) if product_id == missing
        ));
        assert!(matches!(
            ledger.reserve(ids[0], 3).await,
            Err(FulfillmentError::OutOfStock {
                requested: 3,
                available: Some(2),
                ..
            })
        ));
        assert!(matches!(
            ledger.reserve(ids[0], 0).await,
            Err(FulfillmentError::InvalidInput(_))
        ));

        ledger.catalog().deactivate(ids[0]).await.unwrap();
        assert!(matches!(
            ledger.reserve(ids[0], 1).await,
            Err(FulfillmentError::InactiveProduct { .. })
        ));
        assert_eq!(ledger.available(ids[0]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_release_twice_credits_once() {
        let (ledger, ids) = ledger_with(&[5]).await;
        let reservation = ledger.reserve(ids[0], 3).await.unwrap();

        let first = ledger.release(&reservation.token).await.unwrap();
        let second = ledger.release(&reservation.token).await.unwrap();

        assert_eq!(first, ReleaseOutcome::Released);
        assert_eq!(second, ReleaseOutcome::AlreadySettled);
        assert_eq!(ledger.available(ids[0]).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_committed_reservation_cannot_be_released() {
        let (ledger, ids) = ledger_with(&[5]).await;
        let reservation = ledger.reserve(ids[0], 2).await.unwrap();

        ledger.commit(&reservation.token).await.unwrap();
        let outcome = ledger.release(&reservation.token).await.unwrap();

        assert_eq!(outcome, ReleaseOutcome::AlreadySettled);
        assert_eq!(ledger.available(ids[0]).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_batch_is_sorted_by_product() {
        let (ledger, ids) = ledger_with(&[5, 5, 5]).await;
        let requests: Vec<_> = ids
            .iter()
            .rev()
            .map(|id| ReservationRequest::new(*id, 1))
            .collect();

        let reserved = ledger.reserve_batch(&requests).await.unwrap();

        let reserved_ids: Vec<_> = reserved.iter().map(|r| r.token.product_id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(reserved_ids, sorted);
    }

    #[tokio::test]
    async fn test_batch_failure_releases_earlier_items() {
        let (ledger, _) = ledger_with(&[]).await;
        let mut ids = [ProductId::new(), ProductId::new()];
        ids.sort();
        let [first, second] = ids;
        for (product_id, stock) in [(first, 10), (second, 2)] {
            ledger
                .catalog()
                .register(product_id, "item", Money::from_cents(500), stock)
                .await
                .unwrap();
        }

        let result = ledger
            .reserve_batch(&[
                ReservationRequest::new(second, 3),
                ReservationRequest::new(first, 2),
            ])
            .await;

        assert!(matches!(
            result,
            Err(FulfillmentError::OutOfStock { product_id, .. }) if product_id == second
        ));
        assert_eq!(ledger.available(first).await.unwrap(), 10);
        assert_eq!(ledger.available(second).await.unwrap(), 2);
        let product = ledger.catalog().get_product(first).await.unwrap().unwrap();
        assert_eq!(product.reserved(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reservation_that_never_wins_fails_closed() {
        let store = ContendedStore::default();
        let config =
            FulfillmentConfig::default().with_reservation_timeout(Duration::from_millis(200));
        let ledger = StockLedger::new(store.clone(), &config);
        let product_id = ProductId::new();
        ledger
            .catalog()
            .register(product_id, "Oak stool", Money::from_cents(8900), 4)
            .await
            .unwrap();

        store.contended.store(true, Ordering::SeqCst);
        let result = ledger.reserve(product_id, 1).await;

        assert!(matches!(
            result,
            Err(FulfillmentError::OutOfStock {
                requested: 1,
                available: None,
                ..
            })
        ));
        let product = ledger.catalog().get_product(product_id).await.unwrap().unwrap();
        assert_eq!(product.available(), 4);
        assert_eq!(product.reserved(), 0);

        store.contended.store(false, Ordering::SeqCst);
        ledger.reserve(product_id, 1).await.unwrap();
        assert_eq!(ledger.available(product_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_snapshot_outage_does_not_fail_reservations() {
        let store = InMemoryEventStore::new();
        let ledger = StockLedger::new(store.clone(), &FulfillmentConfig::default());
        let product_id = ProductId::new();
        ledger
            .catalog()
            .register(product_id, "Tea towel", Money::from_cents(650), 60)
            .await
            .unwrap();
        store.set_snapshots_unavailable(true);

        // Carries the stream well past its first snapshot point.
        let mut tokens = Vec::new();
        for _ in 0..55 {
            let reservation = ledger.reserve(product_id, 1).await.unwrap();
            tokens.push(reservation.token);
        }

        assert!(store.get_snapshot(product_id.aggregate_id()).await.unwrap().is_none());
        let product = ledger.catalog().get_product(product_id).await.unwrap().unwrap();
        assert_eq!(product.available(), 5);
        assert_eq!(product.reserved(), 55);

        assert_eq!(ledger.release_all(&tokens).await, 55);
        assert_eq!(ledger.available(product_id).await.unwrap(), 60);
    }
}
