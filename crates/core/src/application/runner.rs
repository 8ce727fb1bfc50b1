// Rollup Execution Engine
//
// One call to `execute` processes at most one window of source data:
//   1. load the rollup; a disabled rollup only gets its metadata stopped
//   2. load or create the metadata record (created STARTED, linked atomically)
//   3. gate on status (FAILED never self-resumes, FINISHED per resume policy),
//      then move to STARTED unless the rollup was disabled meanwhile
//   4. read, aggregate, write and refresh one window
//   5. commit the checkpoint with a version-conditioned write
//
// Stop is cooperative: it is observed between windows and at commit time. A
// window whose commit is discarded is replayed later with the same target
// document ids, so the output stays free of duplicates.

use crate::application::aggregate::aggregate_window;
use crate::application::retry::ConflictRetry;
use crate::domain::{AfterKey, Rollup, RollupMetadata, RollupStatus};
use crate::error::{AppError, Result};
use crate::port::{
    IdProvider, MetadataRepository, RollupRepository, SourceReader, TargetWriter, TimeProvider,
    TransactionalRollupStore, WriteError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What the engine does with a continuous rollup whose metadata is FINISHED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Re-enter STARTED as soon as the source has data past the checkpoint
    #[default]
    AutoResume,
    /// Stay FINISHED until an explicit start moves the record to INIT_RESUMED
    RequireStart,
}

impl std::str::FromStr for ResumePolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto_resume" | "auto" => Ok(ResumePolicy::AutoResume),
            "require_start" | "manual" => Ok(ResumePolicy::RequireStart),
            other => Err(AppError::Config(format!(
                "unknown resume policy '{}' (expected auto_resume or require_start)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    pub resume_policy: ResumePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Metadata is FAILED; only an explicit start resumes it
    Failed,
    /// Metadata is FINISHED and may not re-enter
    Finished,
    /// Continuous rollup is caught up with its source
    NoNewData,
}

/// Result of one `execute` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Disabled,
    Skipped(SkipReason),
    /// One window committed; `finished` when it was the last one
    Processed {
        documents: usize,
        rollups: usize,
        finished: bool,
    },
    /// Empty window; metadata moved to FINISHED
    Finished,
    /// The rollup was stopped (or another run committed) while this window ran
    Interrupted,
    /// Unrecoverable error recorded on the metadata
    Failed { reason: String },
}

/// Checkpoint commit of one window
struct WindowCommit<'a> {
    metadata_id: &'a str,
    expected_after: Option<&'a AfterKey>,
    advance_to: Option<AfterKey>,
    documents: usize,
    rollups: usize,
    finished: bool,
}

/// Rollup execution engine, invoked periodically by the worker
pub struct RollupRunner {
    rollups: Arc<dyn RollupRepository>,
    metadata: Arc<dyn MetadataRepository>,
    store: Arc<dyn TransactionalRollupStore>,
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    retry: ConflictRetry,
    config: RunnerConfig,
}

impl RollupRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rollups: Arc<dyn RollupRepository>,
        metadata: Arc<dyn MetadataRepository>,
        store: Arc<dyn TransactionalRollupStore>,
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        retry: ConflictRetry,
        config: RunnerConfig,
    ) -> Self {
        Self {
            rollups,
            metadata,
            store,
            source,
            target,
            id_provider,
            time_provider,
            retry,
            config,
        }
    }

    pub fn resume_policy(&self) -> ResumePolicy {
        self.config.resume_policy
    }

    /// Execute at most one window of a rollup
    ///
    /// # Errors
    /// - `AppError::NotFound` if the rollup does not exist
    /// - `AppError::PartialProgress` on a transient target write failure
    ///   (checkpoint untouched, the next call replays the window)
    /// - `AppError::RetriesExhausted` when conditioned writes keep conflicting
    pub async fn execute(&self, rollup_id: &str) -> Result<ExecutionOutcome> {
        let rollup = self
            .rollups
            .find_rollup(rollup_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Rollup {} not found", rollup_id)))?
            .value;

        if !rollup.enabled {
            self.stop_metadata(&rollup).await?;
            return Ok(ExecutionOutcome::Disabled);
        }

        let metadata = match self.load_metadata(&rollup).await? {
            Some(metadata) => metadata,
            None => return Ok(ExecutionOutcome::Disabled),
        };

        match metadata.status {
            RollupStatus::Failed => return Ok(ExecutionOutcome::Skipped(SkipReason::Failed)),
            RollupStatus::Finished if !rollup.continuous => {
                return Ok(ExecutionOutcome::Skipped(SkipReason::Finished))
            }
            RollupStatus::Finished => match self.config.resume_policy {
                ResumePolicy::RequireStart => {
                    return Ok(ExecutionOutcome::Skipped(SkipReason::Finished))
                }
                ResumePolicy::AutoResume => {
                    if !self.has_new_data(&rollup, &metadata).await? {
                        return Ok(ExecutionOutcome::Skipped(SkipReason::NoNewData));
                    }
                    info!(rollup_id = %rollup.id, "New source data, resuming finished rollup");
                }
            },
            _ => {}
        }

        let (metadata, enabled) = self.mark_started(&rollup, &metadata.id).await?;
        if !enabled {
            info!(rollup_id = %rollup.id, "Rollup disabled before its window started");
            return Ok(ExecutionOutcome::Disabled);
        }
        match metadata.status {
            RollupStatus::Started => {
                let result = self.run_window(&rollup, metadata).await;
                if result.is_err() {
                    self.stop_if_disabled(&rollup.id).await;
                }
                result
            }
            RollupStatus::Failed => Ok(ExecutionOutcome::Skipped(SkipReason::Failed)),
            _ => Ok(ExecutionOutcome::Interrupted),
        }
    }

    /// After a window ended in an error, a stop that landed meanwhile still
    /// has to reach the metadata. The window's own error is what gets returned.
    async fn stop_if_disabled(&self, rollup_id: &str) {
        let rollup = match self.rollups.find_rollup(rollup_id).await {
            Ok(Some(found)) if !found.value.enabled => found.value,
            Ok(_) => return,
            Err(e) => {
                warn!(rollup_id = %rollup_id, error = %e, "Could not re-read rollup after failed window");
                return;
            }
        };
        if let Err(e) = self.stop_metadata(&rollup).await {
            warn!(rollup_id = %rollup_id, error = %e, "Could not stop metadata of disabled rollup");
        }
    }

    async fn stop_metadata(&self, rollup: &Rollup) -> Result<()> {
        let Some(metadata_id) = rollup.metadata_id.as_deref() else {
            return Ok(());
        };
        let now = self.time_provider.now_millis();
        let before = self.metadata.find_metadata(metadata_id).await?;
        let stopped = self
            .retry
            .modify_metadata(self.metadata.as_ref(), metadata_id, "stop metadata", |m| {
                Ok(m.stop(now))
            })
            .await?;

        if let (Some(before), Some(after)) = (before, stopped) {
            if before.value.status != after.status {
                info!(
                    rollup_id = %rollup.id,
                    metadata_id = %metadata_id,
                    from = %before.value.status,
                    "Rollup disabled, metadata stopped"
                );
            }
        }
        Ok(())
    }

    /// Linked metadata, created on first execution. None when the rollup was
    /// disabled before the record could be created.
    async fn load_metadata(&self, rollup: &Rollup) -> Result<Option<RollupMetadata>> {
        if let Some(metadata_id) = rollup.metadata_id.as_deref() {
            return match self.metadata.find_metadata(metadata_id).await? {
                Some(found) => Ok(Some(found.value)),
                None => Err(AppError::Internal(format!(
                    "Rollup {} links missing metadata {}",
                    rollup.id, metadata_id
                ))),
            };
        }
        self.create_metadata(&rollup.id).await
    }

    /// A creator that loses the race to another writer retries and adopts
    /// the winner's record.
    async fn create_metadata(&self, rollup_id: &str) -> Result<Option<RollupMetadata>> {
        self.retry
            .run("create metadata", || self.try_create_metadata(rollup_id))
            .await
    }

    async fn try_create_metadata(&self, rollup_id: &str) -> Result<Option<RollupMetadata>> {
        let mut tx = self.store.begin_transaction().await?;

        let Some(current) = tx.find_rollup(rollup_id).await? else {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("Rollup {} not found", rollup_id)));
        };
        if !current.value.enabled {
            tx.rollback().await?;
            return Ok(None);
        }
        if let Some(existing) = current.value.metadata_id.clone() {
            // Another run created the record first
            tx.rollback().await?;
            debug!(rollup_id = %rollup_id, metadata_id = %existing, "Adopting concurrently created metadata");
            return match self.metadata.find_metadata(&existing).await? {
                Some(found) => Ok(Some(found.value)),
                None => Err(AppError::Internal(format!(
                    "Rollup {} links missing metadata {}",
                    rollup_id, existing
                ))),
            };
        }

        let now = self.time_provider.now_millis();
        let metadata = RollupMetadata::new_started(self.id_provider.generate_id(), rollup_id, now);
        tx.insert_metadata(&metadata).await?;

        let mut rollup = current.value;
        rollup.metadata_id = Some(metadata.id.clone());
        rollup.last_updated_time = now;
        tx.update_rollup(&rollup, current.version).await?;
        tx.commit().await?;

        info!(rollup_id = %rollup_id, metadata_id = %metadata.id, "Created rollup metadata");
        Ok(Some(metadata))
    }

    async fn has_new_data(&self, rollup: &Rollup, metadata: &RollupMetadata) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let next = self
            .source
            .read_window(
                &rollup.source_index,
                metadata.after_key.as_ref(),
                rollup.window_upper_bound(now),
                1,
            )
            .await?;
        Ok(!next.is_empty())
    }

    /// Move the record to STARTED, re-checking the enabled flag in the same
    /// attempt. A rollup disabled meanwhile gets its record stopped instead.
    ///
    /// Returns the record as stored and whether the rollup is still enabled.
    /// A record that may not start (stopped or failed meanwhile) comes back
    /// with its current status.
    async fn mark_started(
        &self,
        rollup: &Rollup,
        metadata_id: &str,
    ) -> Result<(RollupMetadata, bool)> {
        let now = self.time_provider.now_millis();
        let continuous = rollup.continuous;
        let rollup_id = rollup.id.as_str();
        self.retry
            .run("start metadata", || async move {
                let enabled = self
                    .rollups
                    .find_rollup(rollup_id)
                    .await?
                    .map_or(false, |r| r.value.enabled);
                let current = self
                    .metadata
                    .find_metadata(metadata_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!("Metadata {} not found", metadata_id))
                    })?;
                let mut metadata = current.value;

                let changed = if !enabled {
                    metadata.stop(now)
                } else {
                    match metadata.status {
                        RollupStatus::Started | RollupStatus::Failed => false,
                        RollupStatus::Finished if !continuous => false,
                        _ => metadata.start(continuous, now)?,
                    }
                };
                if changed {
                    self.metadata
                        .update_metadata(&metadata, current.version)
                        .await?;
                }
                Ok((metadata, enabled))
            })
            .await
    }

    async fn run_window(
        &self,
        rollup: &Rollup,
        metadata: RollupMetadata,
    ) -> Result<ExecutionOutcome> {
        let now = self.time_provider.now_millis();
        let page_size = rollup.page_size as usize;
        let window_start = metadata.after_key.as_ref();

        let mut records = self
            .source
            .read_window(
                &rollup.source_index,
                window_start,
                rollup.window_upper_bound(now),
                page_size + 1,
            )
            .await?;
        let has_more = records.len() > page_size;
        records.truncate(page_size);

        let Some(last) = records.last().map(|r| r.key()) else {
            return self
                .commit(
                    rollup,
                    WindowCommit {
                        metadata_id: &metadata.id,
                        expected_after: window_start,
                        advance_to: None,
                        documents: 0,
                        rollups: 0,
                        finished: true,
                    },
                )
                .await;
        };

        let docs = match aggregate_window(rollup, window_start, &records) {
            Ok(docs) => docs,
            Err(AppError::Execution(reason)) => {
                return self.record_failure(rollup, &metadata.id, reason).await
            }
            Err(e) => return Err(e),
        };

        if !docs.is_empty() {
            if let Err(e) = self.write_target(&rollup.target_index, &docs).await {
                if e.is_transient() {
                    warn!(
                        rollup_id = %rollup.id,
                        target_index = %rollup.target_index,
                        error = %e,
                        "Transient target write failure, window will be replayed"
                    );
                    return Err(AppError::PartialProgress(format!(
                        "rollup {}: {}",
                        rollup.id, e
                    )));
                }
                return self.record_failure(rollup, &metadata.id, e.to_string()).await;
            }
        }

        debug!(
            rollup_id = %rollup.id,
            documents = records.len(),
            rollups = docs.len(),
            has_more = has_more,
            "Window written"
        );

        self.commit(
            rollup,
            WindowCommit {
                metadata_id: &metadata.id,
                expected_after: window_start,
                advance_to: Some(last),
                documents: records.len(),
                rollups: docs.len(),
                finished: !has_more,
            },
        )
        .await
    }

    async fn write_target(
        &self,
        index: &str,
        docs: &[crate::domain::RollupDocument],
    ) -> std::result::Result<(), WriteError> {
        self.target.write(index, docs).await?;
        self.target.refresh(index).await
    }

    async fn commit(&self, rollup: &Rollup, window: WindowCommit<'_>) -> Result<ExecutionOutcome> {
        let now = self.time_provider.now_millis();
        let window = &window;
        let rollup_id = rollup.id.as_str();
        let continuous = rollup.continuous;

        let outcome = self
            .retry
            .run("commit window", || async move {
                let enabled = self
                    .rollups
                    .find_rollup(rollup_id)
                    .await?
                    .map_or(false, |r| r.value.enabled);
                let current = self
                    .metadata
                    .find_metadata(window.metadata_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!("Metadata {} not found", window.metadata_id))
                    })?;
                let mut metadata = current.value;

                if !enabled {
                    if metadata.stop(now) {
                        self.metadata
                            .update_metadata(&metadata, current.version)
                            .await?;
                    }
                    return Ok(ExecutionOutcome::Interrupted);
                }
                if metadata.status != RollupStatus::Started
                    || metadata.after_key.as_ref() != window.expected_after
                {
                    return Ok(ExecutionOutcome::Interrupted);
                }

                let outcome = match &window.advance_to {
                    Some(key) => {
                        metadata.advance(
                            key.clone(),
                            window.documents as i64,
                            window.rollups as i64,
                            now,
                        )?;
                        ExecutionOutcome::Processed {
                            documents: window.documents,
                            rollups: window.rollups,
                            finished: window.finished,
                        }
                    }
                    None => ExecutionOutcome::Finished,
                };
                if window.finished {
                    metadata.finish(continuous, now)?;
                }
                self.metadata
                    .update_metadata(&metadata, current.version)
                    .await?;
                Ok(outcome)
            })
            .await?;

        match &outcome {
            ExecutionOutcome::Interrupted => info!(
                rollup_id = %rollup_id,
                "Rollup stopped or advanced concurrently, window commit discarded"
            ),
            ExecutionOutcome::Finished => info!(rollup_id = %rollup_id, "Rollup finished"),
            ExecutionOutcome::Processed {
                documents,
                rollups,
                finished,
            } => info!(
                rollup_id = %rollup_id,
                documents = documents,
                rollups = rollups,
                finished = finished,
                "Window committed"
            ),
            _ => {}
        }
        Ok(outcome)
    }

    async fn record_failure(
        &self,
        rollup: &Rollup,
        metadata_id: &str,
        reason: String,
    ) -> Result<ExecutionOutcome> {
        let now = self.time_provider.now_millis();
        error!(rollup_id = %rollup.id, reason = %reason, "Rollup failed");
        self.retry
            .modify_metadata(self.metadata.as_ref(), metadata_id, "fail metadata", |m| {
                if m.status == RollupStatus::Failed {
                    return Ok(false);
                }
                m.fail(reason.as_str(), now)?;
                Ok(true)
            })
            .await?;
        Ok(ExecutionOutcome::Failed { reason })
    }
}
