//! PostgreSQL integration tests.
//!
//! These need Docker and share one container, so they are ignored by default.
//! Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use event_store::{
    AggregateId, AppendBatch, AppendOptions, EventEnvelope, EventStore, EventStoreError,
    EventStoreExt, PostgresEventStore, Snapshot, Version,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_events_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE events, snapshots")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn event(aggregate_id: AggregateId, aggregate_type: &str, version: i64, event_type: &str) -> EventEnvelope {
    EventEnvelope::new(
        aggregate_id,
        aggregate_type,
        Version::new(version),
        event_type,
        &serde_json::json!({"test": true}),
    )
    .unwrap()
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn append_and_retrieve_events() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    let version = store
        .append(
            vec![event(id, "Product", 1, "ProductRegistered")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();
    assert_eq!(version, Version::first());

    let events = store.get_events_for_aggregate(id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "ProductRegistered");
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn stale_expected_version_conflicts() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    store
        .append(
            vec![event(id, "Product", 1, "ProductRegistered")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let result = store
        .append(
            vec![event(id, "Product", 1, "StockReserved")],
            AppendOptions::expect_new(),
        )
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { .. })
    ));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn atomic_append_rolls_back_every_stream() {
    let store = get_test_store().await;
    let order = AggregateId::new();
    let payment = AggregateId::new();

    store
        .append(
            vec![event(payment, "Payment", 1, "PaymentRecorded")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let result = store
        .append_atomic(vec![
            AppendBatch::new(
                vec![event(order, "Order", 1, "OrderStaged")],
                AppendOptions::expect_new(),
            ),
            AppendBatch::new(
                vec![event(payment, "Payment", 1, "PaymentRecorded")],
                AppendOptions::expect_new(),
            ),
        ])
        .await;

    assert!(result.is_err());
    assert!(!store.aggregate_exists(order).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn events_by_type_and_snapshots() {
    let store = get_test_store().await;
    let a = AggregateId::new();
    let b = AggregateId::new();

    let versions = store
        .append_atomic(vec![
            AppendBatch::new(
                vec![event(a, "Order", 1, "OrderStaged"), event(a, "Order", 2, "OrderConfirmed")],
                AppendOptions::expect_new(),
            ),
            AppendBatch::new(
                vec![event(b, "Order", 1, "OrderStaged")],
                AppendOptions::expect_new(),
            ),
        ])
        .await
        .unwrap();
    assert_eq!(versions, vec![Version::new(2), Version::first()]);

    let staged = store.get_events_by_type("OrderStaged").await.unwrap();
    assert_eq!(staged.len(), 2);

    let snapshot = Snapshot::from_state(a, "Order", Version::first(), &serde_json::json!({})).unwrap();
    store.save_snapshot(snapshot).await.unwrap();

    let (snapshot, tail) = store.load_aggregate(a).await.unwrap();
    assert_eq!(snapshot.unwrap().version, Version::first());
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].event_type, "OrderConfirmed");
}
