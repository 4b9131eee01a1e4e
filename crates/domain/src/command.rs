//! Command handling infrastructure.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{AppendBatch, AppendOptions, EventEnvelope, EventStore, EventStoreExt, Snapshot, Version};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::aggregate::{Aggregate, DomainEvent, SnapshotCapable};
use crate::error::DomainError;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The stream version after the command.
    pub new_version: Version,
}

/// A command whose events are decided but not yet written.
///
/// Several prepared commands can be committed together with
/// [`EventStore::append_atomic`].
#[derive(Debug)]
pub struct PreparedCommand<A: Aggregate> {
    /// The aggregate as it will look once the batch is committed.
    pub aggregate: A,

    pub events: Vec<A::Event>,

    /// Envelopes plus the version they expect the stream to be at.
    pub batch: AppendBatch,
}

impl<A: Aggregate> PreparedCommand<A> {
    /// Finishes the command after its batch was written at `new_version`.
    pub fn committed(self, new_version: Version) -> CommandResult<A> {
        let mut aggregate = self.aggregate;
        aggregate.set_version(new_version);
        CommandResult {
            aggregate,
            events: self.events,
            new_version,
        }
    }
}

/// Loads aggregates, runs commands against them and persists the outcome.
///
/// Every write expects the stream version that was loaded, so two commands
/// racing on the same record cannot both succeed: the loser gets an
/// `EventStoreError::ConcurrencyConflict` and nothing it decided is stored.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate + DeserializeOwned,
    A::Event: DeserializeOwned + Serialize,
{
    /// Creates a new command handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate, starting from its snapshot when present.
    ///
    /// A stream with no events yields `A::default()`.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let (snapshot, events) = self.store.load_aggregate(aggregate_id).await?;

        let mut aggregate = match snapshot {
            Some(snapshot) => {
                let version = snapshot.version;
                let mut restored: A = snapshot.into_state()?;
                restored.set_version(version);
                restored
            }
            None => A::default(),
        };

        for envelope in events {
            let event: A::Event = envelope.decode()?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None unless it is visible to readers.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.is_visible().then_some(aggregate))
    }

    /// Decides a command's events without writing them.
    pub async fn prepare<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<PreparedCommand<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;
        let envelopes = build_envelopes::<A>(aggregate_id, current_version, &events)?;

        for event in &events {
            aggregate.apply(event.clone());
        }

        Ok(PreparedCommand {
            aggregate,
            events,
            batch: AppendBatch::new(envelopes, AppendOptions::after(current_version)),
        })
    }

    /// Executes a command and persists the resulting events.
    ///
    /// The command function receives the current aggregate state and returns
    /// either the events to append or an error. An empty event list is a
    /// no-op and writes nothing.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let prepared = self.prepare(aggregate_id, command_fn).await?;

        if prepared.events.is_empty() {
            let version = prepared.aggregate.version();
            return Ok(prepared.committed(version));
        }

        let options = prepared.batch.options;
        let envelopes = prepared.batch.events.clone();
        let new_version = self.store.append(envelopes, options).await.inspect_err(|e| {
            if e.is_conflict() {
                metrics::counter!("command_conflicts_total", "aggregate" => A::aggregate_type())
                    .increment(1);
            }
        })?;

        Ok(prepared.committed(new_version))
    }
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: SnapshotCapable,
    A::Event: DeserializeOwned + Serialize,
{
    /// Executes a command and saves a snapshot when the interval is reached.
    ///
    /// The snapshot is best-effort: once the events are appended the command
    /// has happened, so a failed snapshot write is logged and not returned.
    pub async fn execute_with_snapshot<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let result = self.execute(aggregate_id, command_fn).await?;
        self.snapshot_if_due(aggregate_id, &result).await;
        Ok(result)
    }

    /// Saves a snapshot of a committed result when its interval is reached.
    /// Failures are logged; the stream stays the source of truth.
    pub async fn snapshot_if_due(&self, aggregate_id: AggregateId, result: &CommandResult<A>) {
        if result.events.is_empty() || !result.aggregate.should_snapshot() {
            return;
        }

        let saved = match Snapshot::from_state(
            aggregate_id,
            A::aggregate_type(),
            result.new_version,
            &result.aggregate,
        ) {
            Ok(snapshot) => self.store.save_snapshot(snapshot).await,
            Err(e) => Err(e.into()),
        };

        match saved {
            Ok(()) => {
                tracing::debug!(%aggregate_id, version = %result.new_version, "snapshot saved");
            }
            Err(error) => {
                tracing::warn!(
                    %aggregate_id,
                    version = %result.new_version,
                    %error,
                    "snapshot write failed"
                );
            }
        }
    }
}

fn build_envelopes<A: Aggregate>(
    aggregate_id: AggregateId,
    current_version: Version,
    events: &[A::Event],
) -> Result<Vec<EventEnvelope>, DomainError> {
    let mut envelopes = Vec::with_capacity(events.len());
    let mut version = current_version;

    for event in events {
        version = version.next();
        envelopes.push(EventEnvelope::new(
            aggregate_id,
            A::aggregate_type(),
            version,
            event.event_type(),
            event,
        )?);
    }

    Ok(envelopes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::InMemoryEventStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TallyEvent {
        Opened { id: AggregateId },
        Added { amount: u32 },
    }

    impl DomainEvent for TallyEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TallyEvent::Opened { .. } => "TallyOpened",
                TallyEvent::Added { .. } => "TallyAdded",
            }
        }
    }

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    struct Tally {
        id: Option<AggregateId>,
        total: u32,
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("tally is closed")]
    struct TallyClosed;

    impl From<TallyClosed> for DomainError {
        fn from(_: TallyClosed) -> Self {
            DomainError::AggregateNotFound {
                aggregate_type: "Tally",
                aggregate_id: String::new(),
            }
        }
    }

    impl Aggregate for Tally {
        type Event = TallyEvent;
        type Error = TallyClosed;

        fn aggregate_type() -> &'static str {
            "Tally"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                TallyEvent::Opened { id } => self.id = Some(id),
                TallyEvent::Added { amount } => self.total += amount,
            }
        }
    }

    impl SnapshotCapable for Tally {
        fn snapshot_interval() -> usize {
            2
        }
    }

    #[tokio::test]
    async fn execute_persists_and_applies() {
        let handler: CommandHandler<_, Tally> = CommandHandler::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        handler
            .execute(id, |_| Ok(vec![TallyEvent::Opened { id }]))
            .await
            .unwrap();
        let result = handler
            .execute(id, |_| Ok(vec![TallyEvent::Added { amount: 4 }]))
            .await
            .unwrap();

        assert_eq!(result.new_version, Version::new(2));
        assert_eq!(result.aggregate.total, 4);

        let loaded = handler.load_existing(id).await.unwrap().unwrap();
        assert_eq!(loaded.total, 4);
        assert_eq!(loaded.version(), Version::new(2));
    }

    #[tokio::test]
    async fn empty_command_writes_nothing() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone());

        let result = handler.execute(AggregateId::new(), |_| Ok(vec![])).await.unwrap();

        assert!(result.events.is_empty());
        assert_eq!(result.new_version, Version::initial());
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn command_error_writes_nothing() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone());

        let result = handler.execute(AggregateId::new(), |_| Err(TallyClosed)).await;

        assert!(result.is_err());
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn prepared_commands_commit_together() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone());
        let a = AggregateId::new();
        let b = AggregateId::new();

        let first = handler
            .prepare(a, |_| Ok(vec![TallyEvent::Opened { id: a }]))
            .await
            .unwrap();
        let second = handler
            .prepare(b, |_| Ok(vec![TallyEvent::Opened { id: b }]))
            .await
            .unwrap();

        assert_eq!(store.event_count().await, 0);

        let versions = store
            .append_atomic(vec![first.batch.clone(), second.batch.clone()])
            .await
            .unwrap();
        let committed = first.committed(versions[0]);

        assert_eq!(committed.aggregate.id(), Some(a));
        assert!(handler.load_existing(b).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_write_is_rejected() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone());
        let id = AggregateId::new();
        handler
            .execute(id, |_| Ok(vec![TallyEvent::Opened { id }]))
            .await
            .unwrap();

        let stale = handler
            .prepare(id, |_| Ok(vec![TallyEvent::Added { amount: 1 }]))
            .await
            .unwrap();
        handler
            .execute(id, |_| Ok(vec![TallyEvent::Added { amount: 2 }]))
            .await
            .unwrap();

        let result = store.append_atomic(vec![stale.batch]).await;
        assert!(result.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn snapshot_is_used_on_load() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone());
        let id = AggregateId::new();

        handler
            .execute_with_snapshot(id, |_| Ok(vec![TallyEvent::Opened { id }]))
            .await
            .unwrap();
        handler
            .execute_with_snapshot(id, |_| Ok(vec![TallyEvent::Added { amount: 5 }]))
            .await
            .unwrap();

        let snapshot = store.get_snapshot(id).await.unwrap().unwrap();
        assert_eq!(snapshot.version, Version::new(2));

        handler
            .execute_with_snapshot(id, |_| Ok(vec![TallyEvent::Added { amount: 1 }]))
            .await
            .unwrap();

        let loaded = handler.load(id).await.unwrap();
        assert_eq!(loaded.total, 6);
        assert_eq!(loaded.version(), Version::new(3));
    }

    #[tokio::test]
    async fn failed_snapshot_write_keeps_the_command() {
        let store = InMemoryEventStore::new();
        store.set_snapshots_unavailable(true);
        let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone());
        let id = AggregateId::new();

        handler
            .execute_with_snapshot(id, |_| Ok(vec![TallyEvent::Opened { id }]))
            .await
            .unwrap();
        let result = handler
            .execute_with_snapshot(id, |_| Ok(vec![TallyEvent::Added { amount: 5 }]))
            .await
            .unwrap();

        assert_eq!(result.new_version, Version::new(2));
        assert!(store.get_snapshot(id).await.unwrap().is_none());
        assert_eq!(handler.load(id).await.unwrap().total, 5);
    }
}
