// Worker - Rollup scheduling loop

pub mod constants;
mod panic_guard;
mod shutdown;

use constants::*;
pub use panic_guard::{execute_guarded_async, PanicGuardResult};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::runner::{ExecutionOutcome, RollupRunner};
use crate::application::scheduler::Scheduler;
use crate::error::{AppError, Result};
use crate::port::RollupRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Summary of one scheduling tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub executed: usize,
    pub errors: usize,
}

/// Worker drives the runner for every due rollup, one execution at a time
pub struct RollupWorker {
    rollups: Arc<dyn RollupRepository>,
    runner: Arc<RollupRunner>,
    scheduler: Arc<Scheduler>,
    poll_interval: Duration,
}

impl RollupWorker {
    pub fn new(
        rollups: Arc<dyn RollupRepository>,
        runner: Arc<RollupRunner>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            rollups,
            runner,
            scheduler,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "Worker started");
        loop {
            if shutdown.is_shutdown() {
                info!("Worker shutting down");
                break;
            }
            let pause = match self.tick(&shutdown).await {
                Ok(_) => self.poll_interval,
                Err(e) => {
                    error!(error = %e, "Worker tick failed");
                    ERROR_RECOVERY_SLEEP_DURATION
                }
            };
            tokio::select! {
                _ = sleep(pause) => {},
                _ = shutdown.wait() => {
                    info!("Worker interrupted while idle");
                    break;
                }
            }
        }
        info!("Worker stopped");
        Ok(())
    }

    /// Execute every due rollup once
    ///
    /// Execution errors are logged and counted, never propagated: one failing
    /// rollup must not starve the others. Only listing the rollups can fail.
    pub async fn tick(&self, shutdown: &ShutdownToken) -> Result<TickReport> {
        let enabled = self.rollups.list_enabled().await?;
        let mut report = TickReport::default();

        for rollup_id in self.scheduler.due(&enabled) {
            if shutdown.is_shutdown() {
                break;
            }
            self.scheduler.record_run(&rollup_id);

            let runner = Arc::clone(&self.runner);
            let id = rollup_id.clone();
            let result = execute_guarded_async(async move { runner.execute(&id).await }).await;

            report.executed += 1;
            match result {
                PanicGuardResult::Success(Ok(outcome)) => log_outcome(&rollup_id, &outcome),
                PanicGuardResult::Success(Err(e)) => {
                    report.errors += 1;
                    log_error(&rollup_id, &e);
                }
                PanicGuardResult::Panicked(msg) => {
                    report.errors += 1;
                    error!(rollup_id = %rollup_id, panic_msg = %msg, "Rollup execution panicked");
                }
            }
        }
        Ok(report)
    }
}

fn log_outcome(rollup_id: &str, outcome: &ExecutionOutcome) {
    match outcome {
        ExecutionOutcome::Failed { reason } => {
            warn!(rollup_id = %rollup_id, reason = %reason, "Rollup moved to FAILED")
        }
        other => debug!(rollup_id = %rollup_id, outcome = ?other, "Rollup executed"),
    }
}

fn log_error(rollup_id: &str, err: &AppError) {
    match err {
        AppError::PartialProgress(_) | AppError::RetriesExhausted(_) => {
            warn!(rollup_id = %rollup_id, error = %err, "Rollup execution will be retried next tick")
        }
        _ => error!(rollup_id = %rollup_id, error = %err, "Rollup execution failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::control::{PutRollupRequest, RollupControl};
    use crate::application::retry::ConflictRetry;
    use crate::application::runner::RunnerConfig;
    use crate::domain::{Dimension, RollupStatus, SourceRecord};
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::mocks::InMemoryStore;
    use crate::port::time_provider::ManualTimeProvider;
    use crate::port::WriteError;
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: Arc<ManualTimeProvider>,
        control: RollupControl,
        worker: RollupWorker,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualTimeProvider::new(0));
        let retry = ConflictRetry::new(3, Duration::ZERO);
        let runner = Arc::new(RollupRunner::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(SequentialIdProvider::new("meta")),
            clock.clone(),
            retry.clone(),
            RunnerConfig::default(),
        ));
        let control = RollupControl::new(
            store.clone(),
            store.clone(),
            Arc::new(SequentialIdProvider::new("rollup")),
            clock.clone(),
            retry,
        );
        let worker = RollupWorker::new(
            store.clone(),
            runner,
            Arc::new(Scheduler::new(clock.clone())),
        )
        .with_poll_interval(Duration::from_millis(5));
        Fixture {
            store,
            clock,
            control,
            worker,
        }
    }

    async fn put(f: &Fixture, id: &str, source: &str) {
        f.control
            .put(PutRollupRequest {
                id: Some(id.to_string()),
                source_index: source.to_string(),
                target_index: format!("{}_rollup", source),
                dimensions: vec![Dimension::date_histogram("ts", 10)],
                enabled: true,
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tick_executes_due_rollups_only_once_per_period() {
        let f = fixture();
        put(&f, "r1", "a").await;
        f.store
            .index_source("a", vec![SourceRecord::new("d1", 0, json!({"ts": 0}))])
            .await;
        let (_tx, token) = shutdown_channel();

        let report = f.worker.tick(&token).await.unwrap();
        assert_eq!(report, TickReport { executed: 1, errors: 0 });
        assert_eq!(
            f.control.get_metadata_for_rollup("r1").await.unwrap().status,
            RollupStatus::Finished
        );

        // Same instant: not due again until the period elapses
        assert_eq!(f.worker.tick(&token).await.unwrap().executed, 0);
        f.clock.advance(60_000);
        assert_eq!(f.worker.tick(&token).await.unwrap().executed, 1);
    }

    #[tokio::test]
    async fn test_tick_isolates_failing_rollup() {
        let f = fixture();
        put(&f, "r1", "a").await;
        put(&f, "r2", "b").await;
        f.store
            .index_source("a", vec![SourceRecord::new("d1", 0, json!({"ts": 0}))])
            .await;
        f.store
            .index_source("b", vec![SourceRecord::new("d1", 0, json!({"ts": 0}))])
            .await;
        f.store
            .fail_next_writes(WriteError::Unavailable("down".to_string()), 1);
        let (_tx, token) = shutdown_channel();

        let report = f.worker.tick(&token).await.unwrap();
        assert_eq!(report, TickReport { executed: 2, errors: 1 });
        assert_eq!(
            f.control.get_metadata_for_rollup("r2").await.unwrap().status,
            RollupStatus::Finished
        );
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let f = fixture();
        let (tx, token) = shutdown_channel();
        let worker = Arc::new(f.worker);

        let handle = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.run(token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
