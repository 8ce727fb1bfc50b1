// Conflict retry for version-conditioned read-modify-write
use crate::application::worker::constants::{DEFAULT_CONFLICT_BACKOFF, DEFAULT_CONFLICT_RETRIES};
use crate::domain::{Rollup, RollupMetadata};
use crate::error::{AppError, Result};
use crate::port::{MetadataRepository, RollupRepository};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded retry-on-conflict policy
///
/// Each attempt must re-read the current state: the operation closure is
/// called again from scratch after every `AppError::Conflict`. Any other
/// error (or success) ends the loop. When the bound is hit the conflict is
/// reported as `AppError::RetriesExhausted`, a transient server error.
#[derive(Debug, Clone)]
pub struct ConflictRetry {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self::new(DEFAULT_CONFLICT_RETRIES, DEFAULT_CONFLICT_BACKOFF)
    }
}

impl ConflictRetry {
    /// # Arguments
    /// * `max_attempts` - Total attempts including the first (minimum 1)
    /// * `backoff` - Base delay, multiplied by the attempt number
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(AppError::Conflict(msg)) => {
                    if attempt >= self.max_attempts {
                        warn!(
                            operation = %operation,
                            attempts = attempt,
                            error = %msg,
                            "Conflict retries exhausted"
                        );
                        return Err(AppError::RetriesExhausted(format!(
                            "{} after {} attempts: {}",
                            operation, attempt, msg
                        )));
                    }
                    debug!(
                        operation = %operation,
                        attempt = attempt,
                        error = %msg,
                        "Write conflict, re-reading and retrying"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Read-modify-write of a metadata record.
    ///
    /// `mutate` returns whether it changed the record; unchanged records are not written.
    /// Returns the record as finally stored, or None if it does not exist.
    pub async fn modify_metadata<F>(
        &self,
        repo: &dyn MetadataRepository,
        metadata_id: &str,
        operation: &str,
        mutate: F,
    ) -> Result<Option<RollupMetadata>>
    where
        F: Fn(&mut RollupMetadata) -> Result<bool>,
    {
        let mutate = &mutate;
        self.run(operation, || async move {
            let Some(current) = repo.find_metadata(metadata_id).await? else {
                return Ok(None);
            };
            let mut metadata = current.value;
            if mutate(&mut metadata)? {
                repo.update_metadata(&metadata, current.version).await?;
            }
            Ok(Some(metadata))
        })
        .await
    }

    /// Read-modify-write of a rollup definition. Fails with NotFound if it does not exist.
    pub async fn modify_rollup<F>(
        &self,
        repo: &dyn RollupRepository,
        rollup_id: &str,
        operation: &str,
        mutate: F,
    ) -> Result<Rollup>
    where
        F: Fn(&mut Rollup) -> bool,
    {
        let mutate = &mutate;
        self.run(operation, || async move {
            let current = repo
                .find_rollup(rollup_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Rollup {} not found", rollup_id)))?;
            let mut rollup = current.value;
            if mutate(&mut rollup) {
                repo.update_rollup(&rollup, current.version).await?;
            }
            Ok(rollup)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Dimension, RollupStatus};
    use crate::port::mocks::InMemoryStore;
    use crate::port::{RollupStoreTransaction, TransactionalRollupStore};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_backoff(attempts: u32) -> ConflictRetry {
        ConflictRetry::new(attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_run_retries_conflicts_then_succeeds() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = no_backoff(3)
            .run("test", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::Conflict("stale".to_string()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_exhausted_is_transient_error() {
        let result: Result<()> = no_backoff(2)
            .run("test", || async { Err(AppError::Conflict("stale".to_string())) })
            .await;

        assert!(matches!(result, Err(AppError::RetriesExhausted(_))));
    }

    #[tokio::test]
    async fn test_run_does_not_retry_other_errors() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<()> = no_backoff(5)
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::NotFound("gone".to_string()))
            })
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_modify_metadata_rereads_after_conflict() {
        let store = InMemoryStore::new();
        let rollup = Rollup::new(
            "r1",
            0,
            "source",
            "target",
            vec![Dimension::date_histogram("ts", 1_000)],
        );
        store.insert_rollup(&rollup).await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.insert_metadata(&RollupMetadata::new_started("m1", "r1", 0))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        store.conflict_next_metadata_updates(2);
        let stopped = no_backoff(3)
            .modify_metadata(&store, "m1", "stop", |m| Ok(m.stop(10)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(stopped.status, RollupStatus::Stopped);
        let stored = store.find_metadata("m1").await.unwrap().unwrap();
        assert_eq!(stored.value.status, RollupStatus::Stopped);
        // 1 insert + 2 simulated concurrent writes + our write
        assert_eq!(stored.version, 4);
    }

    #[tokio::test]
    async fn test_modify_rollup_skips_write_when_unchanged() {
        let store = InMemoryStore::new();
        let rollup = Rollup::new(
            "r1",
            0,
            "source",
            "target",
            vec![Dimension::date_histogram("ts", 1_000)],
        );
        store.insert_rollup(&rollup).await.unwrap();

        no_backoff(1)
            .modify_rollup(&store, "r1", "noop", |_| false)
            .await
            .unwrap();

        assert_eq!(store.find_rollup("r1").await.unwrap().unwrap().version, 1);
    }
}
