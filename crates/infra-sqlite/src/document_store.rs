// SQLite Document Store (source reads, target writes)

use crate::error::{map_sqlx_error, map_write_error};
use async_trait::async_trait;
use rollup_core::domain::{AfterKey, RollupDocument, SourceRecord};
use rollup_core::error::Result;
use rollup_core::port::{SourceReader, TargetWriter, WriteError};
use sqlx::SqlitePool;
use tracing::debug;

#[derive(Debug, sqlx::FromRow)]
struct SourceRow {
    doc_id: String,
    timestamp: i64,
    body: String,
}

/// Source and target indices stored as SQLite tables
///
/// Source reads are keyset-paginated on `(timestamp, doc_id)`; target writes
/// are upserts on `(index_name, doc_id)`.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add (or replace) records in a source index
    pub async fn index_source(&self, index: &str, records: &[SourceRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO source_documents (index_name, doc_id, timestamp, body)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (index_name, doc_id)
                DO UPDATE SET timestamp = excluded.timestamp, body = excluded.body
                "#,
            )
            .bind(index)
            .bind(&record.doc_id)
            .bind(record.timestamp)
            .bind(record.body.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(index = %index, count = records.len(), "Source records indexed");
        Ok(())
    }

    /// Documents of a target index ordered by doc_id
    pub async fn target_documents(&self, index: &str) -> Result<Vec<RollupDocument>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT doc_id, rollup_id, body FROM rollup_documents WHERE index_name = ? ORDER BY doc_id",
        )
        .bind(index)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|(doc_id, rollup_id, body)| {
                Ok(RollupDocument {
                    doc_id,
                    rollup_id,
                    body: serde_json::from_str(&body)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SourceReader for SqliteDocumentStore {
    async fn read_window(
        &self,
        index: &str,
        after: Option<&AfterKey>,
        upper_bound: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SourceRecord>> {
        let (after_ts, after_id) = match after {
            Some(key) => (Some(key.timestamp), Some(key.doc_id.as_str())),
            None => (None, None),
        };

        let rows: Vec<SourceRow> = sqlx::query_as(
            r#"
            SELECT doc_id, timestamp, body FROM source_documents
            WHERE index_name = ?1
              AND (?2 IS NULL OR timestamp > ?2 OR (timestamp = ?2 AND doc_id > ?3))
              AND (?4 IS NULL OR timestamp <= ?4)
            ORDER BY timestamp ASC, doc_id ASC
            LIMIT ?5
            "#,
        )
        .bind(index)
        .bind(after_ts)
        .bind(after_id)
        .bind(upper_bound)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(SourceRecord::new(
                    row.doc_id,
                    row.timestamp,
                    serde_json::from_str(&row.body)?,
                ))
            })
            .collect()
    }
}

#[async_trait]
impl TargetWriter for SqliteDocumentStore {
    async fn write(
        &self,
        index: &str,
        docs: &[RollupDocument],
    ) -> std::result::Result<(), WriteError> {
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(map_write_error)?;
        for doc in docs {
            sqlx::query(
                r#"
                INSERT INTO rollup_documents (index_name, doc_id, rollup_id, body)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (index_name, doc_id)
                DO UPDATE SET rollup_id = excluded.rollup_id, body = excluded.body
                "#,
            )
            .bind(index)
            .bind(&doc.doc_id)
            .bind(&doc.rollup_id)
            .bind(doc.body.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;
        }
        tx.commit().await.map_err(map_write_error)?;
        Ok(())
    }

    async fn refresh(&self, _index: &str) -> std::result::Result<(), WriteError> {
        // Committed rows are immediately visible to every connection
        Ok(())
    }
}
