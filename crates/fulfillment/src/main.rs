//! Fulfillment walkthrough.
//!
//! Seeds a small catalog, places an order and drives it to delivery, then
//! prints the collected metrics. Uses PostgreSQL when `DATABASE_URL` is set
//! and the in-memory store otherwise.

use std::sync::Arc;

use common::{ProductId, UserId};
use domain::{
    Address, Aggregate, ContactInfo, Money, OrderStatus, PaymentAuthorization, PaymentMethod,
    ShippingMethod,
};
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use fulfillment::{
    FulfillmentConfig, FulfillmentError, OrderLifecycle, OrderLine, OrderOrchestrator, PlaceOrder,
    StockLedger, telemetry,
};

async fn run<S: EventStore + Clone>(
    store: S,
    config: &FulfillmentConfig,
) -> Result<(), FulfillmentError> {
    let ledger = Arc::new(StockLedger::new(store.clone(), config));
    let orchestrator = OrderOrchestrator::new(store.clone(), ledger.clone(), config);
    let lifecycle = OrderLifecycle::new(store, ledger.clone(), config);

    let mug = ProductId::new();
    let beans = ProductId::new();
    let catalog = [
        (mug, "Enamel mug", 1400, 25),
        (beans, "Coffee beans 1kg", 2600, 40),
    ];
    for (product_id, name, cents, stock) in catalog {
        ledger
            .catalog()
            .register(product_id, name, Money::from_cents(cents), stock)
            .await
            .map_err(|e| FulfillmentError::from_domain("seed_catalog", e))?;
    }

    let address = Address {
        recipient_name: "Ada Byrne".into(),
        line1: "7 Harbour Road".into(),
        line2: None,
        city: "Cork".into(),
        region: None,
        postal_code: "T12 X2Y3".into(),
        country: "IE".into(),
    };
    let placed = orchestrator
        .place_order(PlaceOrder {
            user_id: UserId::new(),
            items: vec![OrderLine::new(mug, 2), OrderLine::new(beans, 1)],
            shipping_address: address.clone(),
            billing_address: address,
            payment_method: PaymentMethod::Card,
            payment_details: None,
            contact: ContactInfo::new("ada@example.com", "+353 21 000 0000"),
            shipping_method: ShippingMethod::Standard,
        })
        .await?;

    let Some(order_id) = placed.order.id() else {
        return Err(FulfillmentError::InvalidOperation("placed order has no id".into()));
    };
    tracing::info!(%order_id, total = %placed.order.total(), "walkthrough order placed");

    lifecycle
        .confirm_payment(order_id, PaymentAuthorization::approved("demo-txn-1"))
        .await?;
    lifecycle
        .assign_tracking_number(order_id, "DEMO123456".into())
        .await?;
    for status in [
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ] {
        lifecycle.transition_order_status(order_id, status).await?;
    }

    let mugs_left = ledger.available(mug).await?;
    tracing::info!(%order_id, mugs_left, "walkthrough order delivered");
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = FulfillmentConfig::from_env();
    telemetry::init_tracing(&config).expect("failed to install tracing subscriber");
    let metrics = telemetry::install_prometheus().expect("failed to install Prometheus recorder");

    tracing::info!(mode = %config.commit_mode, currency = %config.currency, "starting walkthrough");

    let outcome = match &config.database_url {
        Some(url) => {
            let store = PostgresEventStore::connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            store.run_migrations().await.expect("migrations failed");
            run(store, &config).await
        }
        None => run(InMemoryEventStore::new(), &config).await,
    };

    if let Err(err) = outcome {
        tracing::error!(error = %err, retryable = err.is_retryable(), "walkthrough failed");
        std::process::exit(1);
    }

    println!("{}", metrics.render());
}
