// Rollup Control Handlers (put / get / start / stop)
//
// Control calls only flip the rollup's enabled flag and the metadata status;
// they never execute a window. Execution happens on the worker's next tick.

use crate::application::retry::ConflictRetry;
use crate::domain::{
    Dimension, MetricConfig, Rollup, RollupMetadata, RollupStatus, Schedule,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, MetadataRepository, RollupRepository, TimeProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Default schedule period when a put request names none (1 minute)
const DEFAULT_PERIOD_MS: i64 = 60_000;

/// Rollup definition as submitted by clients
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PutRollupRequest {
    /// Generated when absent
    pub id: Option<String>,
    pub description: Option<String>,
    pub source_index: String,
    pub target_index: String,
    pub dimensions: Vec<Dimension>,
    pub metrics: Vec<MetricConfig>,
    pub page_size: Option<i64>,
    pub delay_ms: Option<i64>,
    pub continuous: bool,
    pub schedule: Option<Schedule>,
    /// Create already enabled
    pub enabled: bool,
}

fn require_id(kind: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{} id must not be empty", kind)));
    }
    if id.contains('/') {
        return Err(AppError::BadRequest(format!(
            "{} id must not contain '/': {}",
            kind, id
        )));
    }
    Ok(())
}

pub struct RollupControl {
    rollups: Arc<dyn RollupRepository>,
    metadata: Arc<dyn MetadataRepository>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    retry: ConflictRetry,
}

impl RollupControl {
    pub fn new(
        rollups: Arc<dyn RollupRepository>,
        metadata: Arc<dyn MetadataRepository>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        retry: ConflictRetry,
    ) -> Self {
        Self {
            rollups,
            metadata,
            id_provider,
            time_provider,
            retry,
        }
    }

    /// Validate and store a new rollup definition
    ///
    /// # Errors
    /// - `AppError::BadRequest` on an invalid definition
    /// - `AppError::Conflict` if a rollup with the same id exists
    pub async fn put(&self, request: PutRollupRequest) -> Result<Rollup> {
        let id = match request.id {
            Some(id) => {
                require_id("Rollup", &id)?;
                id
            }
            None => self.id_provider.generate_id(),
        };
        let now = self.time_provider.now_millis();

        let mut rollup = Rollup::new(
            id,
            now,
            request.source_index,
            request.target_index,
            request.dimensions,
        );
        rollup.metrics = request.metrics;
        rollup.continuous = request.continuous;
        rollup.description = request.description.unwrap_or_default();
        rollup.schedule = request
            .schedule
            .unwrap_or_else(|| Schedule::interval(now, DEFAULT_PERIOD_MS));
        if let Some(page_size) = request.page_size {
            rollup.page_size = page_size;
        }
        if let Some(delay_ms) = request.delay_ms {
            rollup.delay_ms = delay_ms;
        }
        if request.enabled {
            rollup.enable(now);
        }

        rollup
            .validate()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        self.rollups.insert_rollup(&rollup).await?;

        info!(
            rollup_id = %rollup.id,
            source_index = %rollup.source_index,
            target_index = %rollup.target_index,
            continuous = rollup.continuous,
            enabled = rollup.enabled,
            "Rollup created"
        );
        Ok(rollup)
    }

    pub async fn get(&self, rollup_id: &str) -> Result<Rollup> {
        require_id("Rollup", rollup_id)?;
        self.rollups
            .find_rollup(rollup_id)
            .await?
            .map(|v| v.value)
            .ok_or_else(|| AppError::NotFound(format!("Rollup {} not found", rollup_id)))
    }

    pub async fn get_metadata(&self, metadata_id: &str) -> Result<RollupMetadata> {
        require_id("Metadata", metadata_id)?;
        self.metadata
            .find_metadata(metadata_id)
            .await?
            .map(|v| v.value)
            .ok_or_else(|| AppError::NotFound(format!("Metadata {} not found", metadata_id)))
    }

    /// Metadata linked to a rollup (NotFound until its first execution)
    pub async fn get_metadata_for_rollup(&self, rollup_id: &str) -> Result<RollupMetadata> {
        let rollup = self.get(rollup_id).await?;
        let metadata_id = rollup.metadata_id.ok_or_else(|| {
            AppError::NotFound(format!("Rollup {} has not run yet", rollup_id))
        })?;
        self.get_metadata(&metadata_id).await
    }

    /// Enable a rollup
    ///
    /// A FAILED record (and the FINISHED record of a continuous rollup) moves
    /// to INIT_RESUMED with its checkpoint kept. A STOPPED record is left for
    /// the engine, which restarts it once it sees the rollup enabled.
    pub async fn start(&self, rollup_id: &str) -> Result<()> {
        require_id("Rollup", rollup_id)?;
        let now = self.time_provider.now_millis();

        let rollup = self
            .retry
            .modify_rollup(self.rollups.as_ref(), rollup_id, "start rollup", |r| {
                r.enable(now)
            })
            .await?;

        let mut status = None;
        if let Some(metadata_id) = rollup.metadata_id.as_deref() {
            let continuous = rollup.continuous;
            status = self
                .retry
                .modify_metadata(self.metadata.as_ref(), metadata_id, "resume metadata", |m| {
                    match m.status {
                        RollupStatus::Failed => Ok(m.resume(continuous, now)?),
                        RollupStatus::Finished if continuous => Ok(m.resume(continuous, now)?),
                        _ => Ok(false),
                    }
                })
                .await?
                .map(|m| m.status);
        }

        info!(rollup_id = %rollup_id, metadata_status = ?status, "Rollup started");
        Ok(())
    }

    /// Disable a rollup. Acknowledged whether or not it was running.
    pub async fn stop(&self, rollup_id: &str) -> Result<()> {
        require_id("Rollup", rollup_id)?;
        let now = self.time_provider.now_millis();

        let rollup = self
            .retry
            .modify_rollup(self.rollups.as_ref(), rollup_id, "stop rollup", |r| {
                r.disable(now)
            })
            .await?;

        if let Some(metadata_id) = rollup.metadata_id.as_deref() {
            self.retry
                .modify_metadata(self.metadata.as_ref(), metadata_id, "stop metadata", |m| {
                    Ok(m.stop(now))
                })
                .await?;
        }

        info!(rollup_id = %rollup_id, "Rollup stopped");
        Ok(())
    }
}
