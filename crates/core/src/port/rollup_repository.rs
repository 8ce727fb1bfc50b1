// Rollup & Metadata Repository Ports (Interface)
//
// Every update is conditioned on the version read by the caller. A stale
// version fails with `AppError::Conflict`; callers re-read and recompute.

use crate::domain::{Rollup, RollupMetadata, RollupStatus, Versioned};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for rollup job definitions
#[async_trait]
pub trait RollupRepository: Send + Sync {
    /// Insert a new rollup (Conflict if the id already exists). Returns the initial version.
    async fn insert_rollup(&self, rollup: &Rollup) -> Result<i64>;

    /// Find rollup by ID
    async fn find_rollup(&self, id: &str) -> Result<Option<Versioned<Rollup>>>;

    /// Conditioned update. Returns the new version.
    ///
    /// # Errors
    /// - `AppError::Conflict` if the stored version differs from `expected_version`
    /// - `AppError::NotFound` if the rollup does not exist
    async fn update_rollup(&self, rollup: &Rollup, expected_version: i64) -> Result<i64>;

    /// All rollups with `enabled = true` (scheduler input)
    async fn list_enabled(&self) -> Result<Vec<Rollup>>;
}

/// Repository interface for run metadata records
///
/// Records are only created through `RollupStoreTransaction::insert_metadata`,
/// atomically with linking them to their rollup.
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    async fn find_metadata(&self, id: &str) -> Result<Option<Versioned<RollupMetadata>>>;

    /// Conditioned update. Returns the new version.
    async fn update_metadata(&self, metadata: &RollupMetadata, expected_version: i64)
        -> Result<i64>;

    /// Find all records in a status (used by start-up recovery)
    async fn find_metadata_by_status(&self, status: RollupStatus) -> Result<Vec<RollupMetadata>>;
}
