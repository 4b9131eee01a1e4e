//! Persistence gateway for the order-fulfillment system.
//!
//! Every durable record is an append-only stream of events keyed by
//! [`AggregateId`]. Appends are guarded by an expected stream version, which
//! gives per-record conditional writes; [`EventStore::append_atomic`] extends
//! that guarantee across several streams at once.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod snapshot;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use snapshot::Snapshot;
pub use store::{AppendBatch, AppendOptions, EventStore, EventStoreExt};
