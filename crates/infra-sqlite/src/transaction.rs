// SQLite Transaction Implementation

use crate::error::{map_sqlx_error, map_tx_error};
use crate::rows;
use async_trait::async_trait;
use rollup_core::domain::{Rollup, RollupMetadata, Versioned};
use rollup_core::error::Result;
use rollup_core::port::{RollupStoreTransaction, Transaction};
use sqlx::{Sqlite, Transaction as SqlxTransaction};

/// Open SQLite transaction; dropped without commit means rolled back
pub struct SqliteRollupTransaction {
    tx: SqlxTransaction<'static, Sqlite>,
}

impl SqliteRollupTransaction {
    pub fn new(tx: SqlxTransaction<'static, Sqlite>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Transaction for SqliteRollupTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_tx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl RollupStoreTransaction for SqliteRollupTransaction {
    async fn find_rollup(&mut self, id: &str) -> Result<Option<Versioned<Rollup>>> {
        rows::find_rollup(&mut *self.tx, id).await
    }

    async fn insert_metadata(&mut self, metadata: &RollupMetadata) -> Result<i64> {
        rows::insert_metadata(&mut *self.tx, metadata).await
    }

    async fn update_rollup(&mut self, rollup: &Rollup, expected_version: i64) -> Result<i64> {
        rows::update_rollup(&mut *self.tx, rollup, expected_version).await
    }
}
