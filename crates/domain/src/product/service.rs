//! Catalog-side access to product stock records.

use common::{ProductId, ReservationId};
use event_store::EventStore;

use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;
use crate::value_objects::Money;

use super::Product;

/// Service for product stock records.
///
/// Each call is a single optimistic attempt: a concurrent write to the same
/// product surfaces as a conflict and the caller decides whether to retry.
pub struct CatalogService<S: EventStore> {
    handler: CommandHandler<S, Product>,
}

impl<S: EventStore> CatalogService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Product> {
        &self.handler
    }

    /// Adds a product to the catalog with its opening stock.
    #[tracing::instrument(skip(self, name))]
    pub async fn register(
        &self,
        product_id: ProductId,
        name: impl Into<String>,
        unit_price: Money,
        initial_stock: u32,
    ) -> Result<CommandResult<Product>, DomainError> {
        let name = name.into();
        self.handler
            .execute_with_snapshot(product_id.aggregate_id(), |product| {
                product.register(product_id, name, unit_price, initial_stock)
            })
            .await
    }

    /// Loads a registered product.
    pub async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>, DomainError> {
        self.handler.load_existing(product_id.aggregate_id()).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn reserve(
        &self,
        product_id: ProductId,
        reservation_id: ReservationId,
        quantity: u32,
    ) -> Result<CommandResult<Product>, DomainError> {
        self.handler
            .execute(product_id.aggregate_id(), |product| {
                product.reserve(reservation_id, quantity)
            })
            .await
    }

    /// Saves a snapshot for a committed write when one is due. Never fails.
    ///
    /// `reserve`, `release` and `commit` leave snapshots to the caller so a
    /// slow snapshot write can be kept out of their deadlines.
    pub async fn snapshot_if_due(&self, product_id: ProductId, result: &CommandResult<Product>) {
        self.handler
            .snapshot_if_due(product_id.aggregate_id(), result)
            .await;
    }

    #[tracing::instrument(skip(self))]
    pub async fn release(
        &self,
        product_id: ProductId,
        reservation_id: ReservationId,
    ) -> Result<CommandResult<Product>, DomainError> {
        self.handler
            .execute(product_id.aggregate_id(), |product| {
                product.release(reservation_id)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn commit(
        &self,
        product_id: ProductId,
        reservation_id: ReservationId,
    ) -> Result<CommandResult<Product>, DomainError> {
        self.handler
            .execute(product_id.aggregate_id(), |product| {
                product.commit(reservation_id)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn restock(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CommandResult<Product>, DomainError> {
        self.handler
            .execute_with_snapshot(product_id.aggregate_id(), |product| product.restock(quantity))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn reprice(
        &self,
        product_id: ProductId,
        unit_price: Money,
    ) -> Result<CommandResult<Product>, DomainError> {
        self.handler
            .execute_with_snapshot(product_id.aggregate_id(), |product| {
                product.reprice(unit_price)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn activate(&self, product_id: ProductId) -> Result<CommandResult<Product>, DomainError> {
        self.handler
            .execute_with_snapshot(product_id.aggregate_id(), |product| product.activate())
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn deactivate(
        &self,
        product_id: ProductId,
    ) -> Result<CommandResult<Product>, DomainError> {
        self.handler
            .execute_with_snapshot(product_id.aggregate_id(), |product| product.deactivate())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::ProductError;
    use event_store::InMemoryEventStore;

    #[tokio::test]
    async fn test_register_and_load() {
        let catalog = CatalogService::new(InMemoryEventStore::new());
        let product_id = ProductId::new();

        catalog
            .register(product_id, "Canvas tote", Money::from_cents(1500), 12)
            .await
            .unwrap();

        let product = catalog.get_product(product_id).await.unwrap().unwrap();
        assert_eq!(product.name(), "Canvas tote");
        assert_eq!(product.available(), 12);
    }

    #[tokio::test]
    async fn test_unknown_product_is_none() {
        let catalog = CatalogService::new(InMemoryEventStore::new());
        assert!(catalog.get_product(ProductId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reserve_release_round_trip() {
        let catalog = CatalogService::new(InMemoryEventStore::new());
        let product_id = ProductId::new();
        catalog
            .register(product_id, "Wool scarf", Money::from_cents(3000), 4)
            .await
            .unwrap();

        let reservation = ReservationId::new();
        let reserved = catalog.reserve(product_id, reservation, 3).await.unwrap();
        assert_eq!(reserved.aggregate.available(), 1);

        catalog.release(product_id, reservation).await.unwrap();
        let second = catalog.release(product_id, reservation).await.unwrap();
        assert!(second.events.is_empty());
        assert_eq!(second.aggregate.available(), 4);
    }

    #[tokio::test]
    async fn test_reserve_unknown_product_fails() {
        let catalog = CatalogService::new(InMemoryEventStore::new());
        let result = catalog.reserve(ProductId::new(), ReservationId::new(), 1).await;
        assert!(matches!(
            result,
            Err(DomainError::Product(ProductError::NotRegistered))
        ));
    }
}
