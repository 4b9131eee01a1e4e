use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version,
    store::{AppendBatch, AppendOptions, EventStore, validate_batches},
};

#[derive(Debug, Default)]
struct Streams {
    /// Every event in write order.
    log: Vec<EventEnvelope>,
    /// Positions in `log`, per stream.
    index: HashMap<AggregateId, Vec<usize>>,
}

impl Streams {
    fn version_of(&self, aggregate_id: AggregateId) -> Version {
        self.index
            .get(&aggregate_id)
            .and_then(|positions| positions.last())
            .map(|&pos| self.log[pos].version)
            .unwrap_or_default()
    }

    fn check(&self, batch: &AppendBatch) -> Result<()> {
        let Some(aggregate_id) = batch.aggregate_id() else {
            return Ok(());
        };
        let current = self.version_of(aggregate_id);

        if let Some(expected) = batch.options.expected_version
            && current != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            });
        }

        // Mirrors the unique (aggregate_id, version) constraint of the SQL schema.
        if batch.events[0].version != current.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: batch.options.expected_version.unwrap_or(current),
                actual: current,
            });
        }
        Ok(())
    }

    fn write(&mut self, events: Vec<EventEnvelope>) -> Version {
        let mut last = Version::initial();
        for event in events {
            last = event.version;
            self.index
                .entry(event.aggregate_id)
                .or_default()
                .push(self.log.len());
            self.log.push(event);
        }
        last
    }

    fn stream(&self, aggregate_id: AggregateId) -> impl Iterator<Item = &EventEnvelope> {
        self.index
            .get(&aggregate_id)
            .into_iter()
            .flatten()
            .map(|&pos| &self.log[pos])
    }
}

#[derive(Debug, Clone)]
struct InjectedFault {
    aggregate_type: String,
    successes_left: usize,
}

/// In-memory event store.
///
/// Same semantics as the PostgreSQL store: appends check versions under one
/// write lock, so a check-then-write can never interleave with another
/// writer. Appends can also be made to fail on demand to exercise
/// compensation paths.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<Streams>>,
    snapshots: Arc<RwLock<HashMap<AggregateId, Snapshot>>>,
    faults: Arc<Mutex<Vec<InjectedFault>>>,
    snapshots_unavailable: Arc<AtomicBool>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.streams.read().await.log.len()
    }

    /// Lets `skip` appends touching `aggregate_type` through, then fails the
    /// next one with [`EventStoreError::Unavailable`]. The fault fires once.
    pub async fn fail_next_append(&self, aggregate_type: impl Into<String>, skip: usize) {
        self.faults.lock().await.push(InjectedFault {
            aggregate_type: aggregate_type.into(),
            successes_left: skip,
        });
    }

    /// Makes every snapshot write fail with [`EventStoreError::Unavailable`]
    /// until switched back. Event appends are unaffected.
    pub fn set_snapshots_unavailable(&self, unavailable: bool) {
        self.snapshots_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Removes all pending injected faults.
    pub async fn clear_faults(&self) {
        self.faults.lock().await.clear();
    }

    async fn trip_fault(&self, batches: &[AppendBatch]) -> Result<()> {
        let mut faults = self.faults.lock().await;
        let mut tripped = None;

        for batch in batches {
            let Some(aggregate_type) = batch.aggregate_type() else {
                continue;
            };
            if let Some(pos) = faults
                .iter()
                .position(|f| f.aggregate_type == aggregate_type)
            {
                if faults[pos].successes_left == 0 {
                    faults.remove(pos);
                    tripped = Some(aggregate_type.to_string());
                } else {
                    faults[pos].successes_left -= 1;
                }
            }
        }

        match tripped {
            Some(aggregate_type) => {
                tracing::debug!(%aggregate_type, "injected append failure");
                Err(EventStoreError::Unavailable(format!(
                    "injected failure writing {aggregate_type}"
                )))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        let versions = self
            .append_atomic(vec![AppendBatch::new(events, options)])
            .await?;
        Ok(versions.first().copied().unwrap_or_default())
    }

    async fn append_atomic(&self, batches: Vec<AppendBatch>) -> Result<Vec<Version>> {
        validate_batches(&batches)?;
        self.trip_fault(&batches).await?;

        let mut streams = self.streams.write().await;
        for batch in &batches {
            streams.check(batch)?;
        }

        let events: usize = batches.iter().map(|b| b.events.len()).sum();
        let versions = batches
            .into_iter()
            .map(|batch| streams.write(batch.events))
            .collect();
        metrics::counter!("events_appended_total", "backend" => "memory").increment(events as u64);
        Ok(versions)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let streams = self.streams.read().await;
        Ok(streams.stream(aggregate_id).cloned().collect())
    }

    async fn get_events_for_aggregate_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let streams = self.streams.read().await;
        Ok(streams
            .stream(aggregate_id)
            .filter(|e| e.version >= from_version)
            .cloned()
            .collect())
    }

    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        let streams = self.streams.read().await;
        Ok(streams
            .log
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let streams = self.streams.read().await;
        Ok(streams
            .index
            .contains_key(&aggregate_id)
            .then(|| streams.version_of(aggregate_id)))
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        if self.snapshots_unavailable.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable("snapshot writes disabled".into()));
        }
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(&aggregate_id).cloned())
    }
}
