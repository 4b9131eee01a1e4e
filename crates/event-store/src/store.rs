use async_trait::async_trait;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version};

/// Options for appending events to a stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOptions {
    /// Expected version of the stream for optimistic concurrency control.
    /// If None, no version check is performed (use with caution).
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the stream to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the stream to not exist yet.
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }

    /// Chooses `expect_new` for an unwritten stream, `expect_version` otherwise.
    pub fn after(version: Version) -> Self {
        if version == Version::initial() {
            Self::expect_new()
        } else {
            Self::expect_version(version)
        }
    }
}

/// Events for a single stream together with the version they expect.
#[derive(Debug, Clone)]
pub struct AppendBatch {
    pub events: Vec<EventEnvelope>,
    pub options: AppendOptions,
}

impl AppendBatch {
    pub fn new(events: Vec<EventEnvelope>, options: AppendOptions) -> Self {
        Self { events, options }
    }

    /// The stream this batch targets. Empty batches have none.
    pub fn aggregate_id(&self) -> Option<AggregateId> {
        self.events.first().map(|e| e.aggregate_id)
    }

    /// The record kind this batch targets.
    pub fn aggregate_type(&self) -> Option<&str> {
        self.events.first().map(|e| e.aggregate_type.as_str())
    }
}

/// Durable storage for event streams.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events to one stream.
    ///
    /// Either every event is written or none is. With `expected_version`
    /// set, fails with `ConcurrencyConflict` if the stream moved.
    /// Returns the stream version after the append.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Appends to several streams as one unit.
    ///
    /// Every batch's expected version is checked before anything is written;
    /// a single mismatch or storage failure leaves all streams untouched.
    /// Returns the new version of each stream, in batch order.
    async fn append_atomic(&self, batches: Vec<AppendBatch>) -> Result<Vec<Version>>;

    /// Retrieves all events of a stream, oldest first.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Retrieves a stream's events starting at `from_version` (inclusive).
    async fn get_events_for_aggregate_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>>;

    /// Retrieves every event with the given name across all streams, in write order.
    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>>;

    /// Gets the current version of a stream, or None if it was never written.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Saves a snapshot, replacing any previous one for the stream.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Retrieves the latest snapshot of a stream.
    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;
}

/// Convenience methods available on every event store.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Checks if a stream has any events.
    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }

    /// Loads a stream's events, starting from its snapshot if one exists.
    async fn load_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<(Option<Snapshot>, Vec<EventEnvelope>)> {
        if let Some(snapshot) = self.get_snapshot(aggregate_id).await? {
            let events = self
                .get_events_for_aggregate_from_version(aggregate_id, snapshot.version.next())
                .await?;
            Ok((Some(snapshot), events))
        } else {
            let events = self.get_events_for_aggregate(aggregate_id).await?;
            Ok((None, events))
        }
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks that a batch targets one stream with consecutive versions.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty event list".to_string(),
        ));
    };

    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        if event.aggregate_id != first.aggregate_id || event.aggregate_type != first.aggregate_type
        {
            return Err(EventStoreError::InvalidAppend(
                "all events in a batch must target the same aggregate".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {}, got {}",
                expected_version, event.version
            )));
        }
    }

    Ok(())
}

/// Checks a set of batches for an atomic append: each valid, no stream twice.
pub fn validate_batches(batches: &[AppendBatch]) -> Result<()> {
    if batches.is_empty() {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty batch list".to_string(),
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for batch in batches {
        validate_events_for_append(&batch.events)?;
        if let Some(id) = batch.aggregate_id()
            && !seen.insert(id)
        {
            return Err(EventStoreError::InvalidAppend(format!(
                "aggregate {id} appears in more than one batch"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::new(
            aggregate_id,
            "Order",
            Version::new(version),
            "OrderStaged",
            &serde_json::json!({}),
        )
        .unwrap()
    }

    #[test]
    fn append_options_after_initial_expects_new() {
        assert_eq!(
            AppendOptions::after(Version::initial()).expected_version,
            Some(Version::initial())
        );
        assert_eq!(
            AppendOptions::after(Version::new(4)).expected_version,
            Some(Version::new(4))
        );
    }

    #[test]
    fn rejects_empty_and_gapped_batches() {
        assert!(validate_events_for_append(&[]).is_err());

        let id = AggregateId::new();
        assert!(validate_events_for_append(&[event(id, 1), event(id, 2)]).is_ok());
        assert!(validate_events_for_append(&[event(id, 1), event(id, 3)]).is_err());
        assert!(validate_events_for_append(&[event(id, 1), event(AggregateId::new(), 2)]).is_err());
    }

    #[test]
    fn rejects_same_stream_in_two_batches() {
        let id = AggregateId::new();
        let batches = vec![
            AppendBatch::new(vec![event(id, 1)], AppendOptions::expect_new()),
            AppendBatch::new(vec![event(id, 2)], AppendOptions::new()),
        ];
        assert!(matches!(
            validate_batches(&batches),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }
}
