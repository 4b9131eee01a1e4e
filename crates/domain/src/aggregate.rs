//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened to a record.
/// They are immutable and named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name stored alongside the payload.
    fn event_type(&self) -> &'static str;
}

/// Trait for event-sourced records.
///
/// An aggregate is rebuilt by replaying its events, decides which new events
/// a command produces, and applies events without side effects.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors its commands can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the record kind, used as the stream's aggregate type.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's identifier, or None before its first event.
    fn id(&self) -> Option<AggregateId>;

    /// Returns the current stream version.
    fn version(&self) -> Version;

    /// Sets the stream version after loading or persisting events.
    fn set_version(&mut self, version: Version);

    /// Applies an event. Must be pure and infallible.
    fn apply(&mut self, event: Self::Event);

    /// Whether readers may observe this record.
    ///
    /// Records written in several steps override this to stay hidden until
    /// the final step lands.
    fn is_visible(&self) -> bool {
        self.id().is_some()
    }

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

/// Aggregates whose state is periodically snapshotted.
///
/// Snapshotting is an optimization to avoid replaying every event when
/// loading a long-lived stream.
pub trait SnapshotCapable: Aggregate + Serialize + DeserializeOwned {
    /// Number of events between snapshots.
    fn snapshot_interval() -> usize {
        100
    }

    /// Returns whether a snapshot should be taken at the current version.
    fn should_snapshot(&self) -> bool {
        self.version().as_i64() > 0
            && (self.version().as_i64() as usize).is_multiple_of(Self::snapshot_interval())
    }
}
