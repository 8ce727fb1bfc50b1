// SQLite Rollup & Metadata Repository Implementation

use crate::error::{map_sqlx_error, map_tx_error};
use crate::rows::{self, MetadataRow, RollupRow};
use crate::SqliteRollupTransaction;
use async_trait::async_trait;
use rollup_core::domain::{Rollup, RollupMetadata, RollupStatus, Versioned};
use rollup_core::error::Result;
use rollup_core::port::{
    MetadataRepository, RollupRepository, RollupStoreTransaction, TransactionalRollupStore,
};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool};
use tracing::debug;

pub struct SqliteRollupRepository {
    pool: SqlitePool,
}

impl SqliteRollupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool.acquire().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl RollupRepository for SqliteRollupRepository {
    async fn insert_rollup(&self, rollup: &Rollup) -> Result<i64> {
        let mut conn = self.conn().await?;
        let version = rows::insert_rollup(&mut conn, rollup).await?;
        debug!(rollup_id = %rollup.id, "Rollup row inserted");
        Ok(version)
    }

    async fn find_rollup(&self, id: &str) -> Result<Option<Versioned<Rollup>>> {
        let mut conn = self.conn().await?;
        rows::find_rollup(&mut conn, id).await
    }

    async fn update_rollup(&self, rollup: &Rollup, expected_version: i64) -> Result<i64> {
        let mut conn = self.conn().await?;
        rows::update_rollup(&mut conn, rollup, expected_version).await
    }

    async fn list_enabled(&self) -> Result<Vec<Rollup>> {
        let rows: Vec<RollupRow> =
            sqlx::query_as("SELECT * FROM rollups WHERE enabled = 1 ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| row.into_versioned().map(|v| v.value))
            .collect()
    }
}

#[async_trait]
impl MetadataRepository for SqliteRollupRepository {
    async fn find_metadata(&self, id: &str) -> Result<Option<Versioned<RollupMetadata>>> {
        let mut conn = self.conn().await?;
        rows::find_metadata(&mut conn, id).await
    }

    async fn update_metadata(
        &self,
        metadata: &RollupMetadata,
        expected_version: i64,
    ) -> Result<i64> {
        let mut conn = self.conn().await?;
        rows::update_metadata(&mut conn, metadata, expected_version).await
    }

    async fn find_metadata_by_status(&self, status: RollupStatus) -> Result<Vec<RollupMetadata>> {
        let rows: Vec<MetadataRow> = sqlx::query_as(
            r#"
            SELECT * FROM rollup_metadata
            WHERE status = ?
            ORDER BY last_updated_time ASC, id ASC
            "#,
        )
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| row.into_versioned().map(|v| v.value))
            .collect()
    }
}

#[async_trait]
impl TransactionalRollupStore for SqliteRollupRepository {
    /// Takes the write lock up front so concurrent creators queue on the
    /// busy timeout instead of failing a deferred lock upgrade.
    async fn begin_transaction(&self) -> Result<Box<dyn RollupStoreTransaction>> {
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(map_tx_error)?;
        Ok(Box::new(SqliteRollupTransaction::new(tx)))
    }
}
