use common::AggregateId;
use event_store::EventStore;

use crate::command::{CommandHandler, CommandResult, PreparedCommand};
use crate::error::DomainError;

use super::{NewPayment, Payment, PaymentAuthorization};

/// Service for payment records.
pub struct PaymentService<S: EventStore> {
    handler: CommandHandler<S, Payment>,
}

impl<S: EventStore> PaymentService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Payment> {
        &self.handler
    }

    pub async fn prepare_record(
        &self,
        payment_id: AggregateId,
        payment: NewPayment,
    ) -> Result<PreparedCommand<Payment>, DomainError> {
        self.handler
            .prepare(payment_id, |current| current.record(payment_id, payment))
            .await
    }

    #[tracing::instrument(skip(self, payment))]
    pub async fn record(
        &self,
        payment_id: AggregateId,
        payment: NewPayment,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.handler
            .execute(payment_id, |current| current.record(payment_id, payment))
            .await
    }

    #[tracing::instrument(skip(self, authorization))]
    pub async fn confirm(
        &self,
        payment_id: AggregateId,
        authorization: PaymentAuthorization,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.handler
            .execute(payment_id, |payment| payment.confirm(authorization))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel_for_order(
        &self,
        payment_id: AggregateId,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.handler
            .execute(payment_id, |payment| payment.cancel_for_order())
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn discard(
        &self,
        payment_id: AggregateId,
        reason: String,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.handler
            .execute(payment_id, |payment| payment.discard(reason))
            .await
    }

    pub async fn get_payment(&self, payment_id: AggregateId) -> Result<Option<Payment>, DomainError> {
        self.handler.load_existing(payment_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::PaymentStatus;
    use crate::value_objects::{Money, PaymentMethod};
    use event_store::InMemoryEventStore;

    #[tokio::test]
    async fn test_record_confirm_and_cancel() {
        let service = PaymentService::new(InMemoryEventStore::new());
        let payment_id = AggregateId::new();

        service
            .record(
                payment_id,
                NewPayment {
                    order_id: AggregateId::new(),
                    method: PaymentMethod::DigitalWallet,
                    amount: Money::from_cents(999),
                    currency: "EUR".into(),
                    authorization: None,
                },
            )
            .await
            .unwrap();

        service
            .confirm(payment_id, PaymentAuthorization::approved("w-77"))
            .await
            .unwrap();
        let result = service.cancel_for_order(payment_id).await.unwrap();
        assert_eq!(result.aggregate.status(), PaymentStatus::Refunded);

        let loaded = service.get_payment(payment_id).await.unwrap().unwrap();
        assert_eq!(loaded.status(), PaymentStatus::Refunded);
        assert_eq!(loaded.transaction_ref(), Some("w-77"));
    }

    #[tokio::test]
    async fn test_cancel_unknown_payment_fails() {
        let service = PaymentService::new(InMemoryEventStore::new());
        assert!(matches!(
            service.cancel_for_order(AggregateId::new()).await,
            Err(DomainError::Payment(_))
        ));
    }
}
