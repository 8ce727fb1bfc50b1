// Start-up reconciliation of interrupted stops
use crate::application::retry::ConflictRetry;
use crate::domain::RollupStatus;
use crate::port::{MetadataRepository, RollupRepository, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

/// Recovery service
///
/// A stop disables the rollup first and stops its metadata second. If the
/// daemon dies between the two writes, the metadata stays STARTED (or
/// INIT_RESUMED) under a disabled rollup. The engine repairs this lazily, but
/// disabled rollups are never scheduled, so the daemon reconciles on start-up.
pub struct RecoveryService {
    rollups: Arc<dyn RollupRepository>,
    metadata: Arc<dyn MetadataRepository>,
    time_provider: Arc<dyn TimeProvider>,
    retry: ConflictRetry,
}

impl RecoveryService {
    pub fn new(
        rollups: Arc<dyn RollupRepository>,
        metadata: Arc<dyn MetadataRepository>,
        time_provider: Arc<dyn TimeProvider>,
        retry: ConflictRetry,
    ) -> Self {
        Self {
            rollups,
            metadata,
            time_provider,
            retry,
        }
    }

    /// Stop running metadata whose rollup is disabled or gone
    ///
    /// # Returns
    /// Number of records stopped
    pub async fn reconcile(&self) -> crate::error::Result<usize> {
        let mut running = self
            .metadata
            .find_metadata_by_status(RollupStatus::Started)
            .await?;
        running.extend(
            self.metadata
                .find_metadata_by_status(RollupStatus::InitResumed)
                .await?,
        );

        let mut stopped = 0;
        for record in running {
            let enabled = match self.rollups.find_rollup(&record.rollup_id).await? {
                Some(rollup) => rollup.value.enabled,
                None => {
                    warn!(
                        metadata_id = %record.id,
                        rollup_id = %record.rollup_id,
                        "Metadata references a missing rollup"
                    );
                    false
                }
            };
            if enabled {
                continue;
            }

            let now = self.time_provider.now_millis();
            let updated = self
                .retry
                .modify_metadata(self.metadata.as_ref(), &record.id, "recover stop", |m| {
                    Ok(m.stop(now))
                })
                .await?;
            if updated.is_some_and(|m| m.status == RollupStatus::Stopped) {
                info!(
                    metadata_id = %record.id,
                    rollup_id = %record.rollup_id,
                    from = %record.status,
                    "Stopped metadata of disabled rollup"
                );
                stopped += 1;
            }
        }

        info!(stopped_count = %stopped, "Start-up reconciliation complete");
        Ok(stopped)
    }
}
