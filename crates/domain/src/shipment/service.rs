use common::AggregateId;
use event_store::EventStore;

use crate::command::{CommandHandler, CommandResult, PreparedCommand};
use crate::error::DomainError;

use super::{NewShipment, Shipment};

/// Service for shipment records.
pub struct ShipmentService<S: EventStore> {
    handler: CommandHandler<S, Shipment>,
}

impl<S: EventStore> ShipmentService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Shipment> {
        &self.handler
    }

    pub async fn prepare_record(
        &self,
        shipment_id: AggregateId,
        shipment: NewShipment,
    ) -> Result<PreparedCommand<Shipment>, DomainError> {
        self.handler
            .prepare(shipment_id, |current| current.record(shipment_id, shipment))
            .await
    }

    #[tracing::instrument(skip(self, shipment))]
    pub async fn record(
        &self,
        shipment_id: AggregateId,
        shipment: NewShipment,
    ) -> Result<CommandResult<Shipment>, DomainError> {
        self.handler
            .execute(shipment_id, |current| current.record(shipment_id, shipment))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn assign_tracking_number(
        &self,
        shipment_id: AggregateId,
        tracking_number: String,
    ) -> Result<CommandResult<Shipment>, DomainError> {
        self.handler
            .execute(shipment_id, |shipment| {
                shipment.assign_tracking_number(tracking_number)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn dispatch(
        &self,
        shipment_id: AggregateId,
    ) -> Result<CommandResult<Shipment>, DomainError> {
        self.handler
            .execute(shipment_id, |shipment| shipment.dispatch())
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn deliver(
        &self,
        shipment_id: AggregateId,
    ) -> Result<CommandResult<Shipment>, DomainError> {
        self.handler
            .execute(shipment_id, |shipment| shipment.deliver())
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn discard(
        &self,
        shipment_id: AggregateId,
        reason: String,
    ) -> Result<CommandResult<Shipment>, DomainError> {
        self.handler
            .execute(shipment_id, |shipment| shipment.discard(reason))
            .await
    }

    pub async fn get_shipment(
        &self,
        shipment_id: AggregateId,
    ) -> Result<Option<Shipment>, DomainError> {
        self.handler.load_existing(shipment_id).await
    }
}
