//! Order service providing a simplified API for order operations.

use std::collections::HashSet;

use common::{AggregateId, UserId};
use event_store::EventStore;

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandResult, PreparedCommand};
use crate::error::DomainError;

use super::{NewOrder, Order, OrderStatus, ReservationSettlement, events::OrderStagedData};

/// Service for managing orders.
///
/// Reads only ever return confirmed orders; staged and discarded ones stay
/// hidden.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
}

impl<S: EventStore> OrderService<S> {
    /// Creates a new order service with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    /// Returns a reference to the underlying command handler.
    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    /// Decides the events of a placed (staged and confirmed) order without
    /// writing them.
    pub async fn prepare_place(
        &self,
        order_id: AggregateId,
        order: NewOrder,
    ) -> Result<PreparedCommand<Order>, DomainError> {
        self.handler
            .prepare(order_id, |current| current.place(order_id, order))
            .await
    }

    #[tracing::instrument(skip(self, order))]
    pub async fn stage(
        &self,
        order_id: AggregateId,
        order: NewOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, |current| current.stage(order_id, order))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, order_id: AggregateId) -> Result<CommandResult<Order>, DomainError> {
        self.handler.execute(order_id, |order| order.confirm()).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn discard(
        &self,
        order_id: AggregateId,
        reason: String,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, |order| order.discard(reason))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn transition(
        &self,
        order_id: AggregateId,
        target: OrderStatus,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, |order| order.transition(target))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn settle_reservations(
        &self,
        order_id: AggregateId,
        settlement: ReservationSettlement,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(order_id, |order| order.settle_reservations(settlement))
            .await
    }

    /// Gets a confirmed order by ID.
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }

    /// Loads an order in any phase, or fails if it was never staged.
    pub async fn load_any(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        let order = self.handler.load(order_id).await?;
        if order.id().is_none() {
            return Err(DomainError::not_found("Order", order_id));
        }
        Ok(order)
    }

    /// Confirmed orders placed by one user, oldest first.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, DomainError> {
        self.list_matching(|staged| staged.user_id == user_id).await
    }

    /// Every confirmed order, oldest first.
    pub async fn list_all(&self) -> Result<Vec<Order>, DomainError> {
        self.list_matching(|_| true).await
    }

    async fn list_matching<F>(&self, filter: F) -> Result<Vec<Order>, DomainError>
    where
        F: Fn(&OrderStagedData) -> bool,
    {
        let staged = self.handler.store().get_events_by_type("OrderStaged").await?;

        let mut seen = HashSet::new();
        let mut orders = Vec::new();
        for envelope in staged {
            if !seen.insert(envelope.aggregate_id) {
                continue;
            }
            let event: super::OrderEvent = envelope.decode()?;
            let super::OrderEvent::OrderStaged(data) = event else {
                continue;
            };
            if !filter(&data) {
                continue;
            }
            if let Some(order) = self.handler.load_existing(envelope.aggregate_id).await? {
                orders.push(order);
            }
        }

        Ok(orders)
    }
}
