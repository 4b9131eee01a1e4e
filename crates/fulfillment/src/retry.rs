//! Retry of optimistic writes that lost a race.

use std::future::Future;
use std::time::Duration;

use domain::DomainError;

use crate::config::FulfillmentConfig;

/// Backoff schedule for retrying after a `ConcurrencyConflict`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Retries after the first attempt. `None` retries until the caller's
    /// deadline cancels the future.
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    /// Unbounded retries, for callers that wrap the loop in a timeout.
    pub fn for_reservations(config: &FulfillmentConfig) -> Self {
        Self {
            initial_backoff: config.reservation_backoff,
            max_backoff: config.reservation_max_backoff,
            max_retries: None,
        }
    }

    pub fn for_transitions(config: &FulfillmentConfig) -> Self {
        Self {
            initial_backoff: config.reservation_backoff,
            max_backoff: config.reservation_max_backoff,
            max_retries: Some(config.transition_retries),
        }
    }

    /// Runs `op` until it succeeds, fails with something other than a
    /// conflict, or the retries run out. Every conflict bumps `metric`.
    pub async fn run<T, F, Fut>(&self, metric: &'static str, mut op: F) -> Result<T, DomainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let mut backoff = self.initial_backoff;
        let mut retries = 0u32;

        loop {
            match op().await {
                Err(e) if e.is_conflict() && self.max_retries.is_none_or(|max| retries < max) => {
                    metrics::counter!(metric).increment(1);
                    retries += 1;
                    tracing::debug!(retries, ?backoff, "write conflict, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use common::AggregateId;
    use event_store::{EventStoreError, Version};

    use super::*;

    fn conflict() -> DomainError {
        DomainError::EventStore(EventStoreError::ConcurrencyConflict {
            aggregate_id: AggregateId::new(),
            expected: Version::new(1),
            actual: Version::new(2),
        })
    }

    fn policy(max_retries: Option<u32>) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            max_retries,
        }
    }

    #[tokio::test]
    async fn test_retries_conflicts_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy(None)
            .run("test_conflicts_total", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(conflict())
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy(Some(2))
            .run("test_conflicts_total", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(conflict())
            })
            .await;

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy(None)
            .run("test_conflicts_total", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DomainError::EventStore(EventStoreError::Unavailable(
                    "down".into(),
                )))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
