// Row types and version-conditioned SQL shared by the repository and its transaction

use crate::error::map_sqlx_error;
use rollup_core::domain::{
    AfterKey, Rollup, RollupMetadata, RollupStatus, Versioned,
};
use rollup_core::error::{AppError, Result};
use sqlx::SqliteConnection;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RollupRow {
    id: String,
    version: i64,
    schema_version: i64,
    enabled: bool,
    enabled_time: Option<i64>,
    last_updated_time: i64,
    metadata_id: Option<String>,
    schedule: String,
    continuous: bool,
    description: String,
    source_index: String,
    target_index: String,
    dimensions: String,
    metrics: String,
    page_size: i64,
    delay_ms: i64,
}

impl RollupRow {
    pub(crate) fn into_versioned(self) -> Result<Versioned<Rollup>> {
        let rollup = Rollup {
            id: self.id,
            schema_version: self.schema_version,
            enabled: self.enabled,
            enabled_time: self.enabled_time,
            last_updated_time: self.last_updated_time,
            metadata_id: self.metadata_id,
            schedule: serde_json::from_str(&self.schedule)?,
            continuous: self.continuous,
            description: self.description,
            source_index: self.source_index,
            target_index: self.target_index,
            dimensions: serde_json::from_str(&self.dimensions)?,
            metrics: serde_json::from_str(&self.metrics)?,
            page_size: self.page_size,
            delay_ms: self.delay_ms,
        };
        Ok(Versioned::new(rollup, self.version))
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MetadataRow {
    id: String,
    version: i64,
    rollup_id: String,
    status: String,
    after_key_timestamp: Option<i64>,
    after_key_doc_id: Option<String>,
    last_updated_time: i64,
    documents_processed: i64,
    rollups_indexed: i64,
    failure_reason: Option<String>,
}

impl MetadataRow {
    pub(crate) fn into_versioned(self) -> Result<Versioned<RollupMetadata>> {
        let status: RollupStatus = self.status.parse()?;
        let after_key = match (self.after_key_timestamp, self.after_key_doc_id) {
            (Some(timestamp), Some(doc_id)) => Some(AfterKey::new(timestamp, doc_id)),
            (None, None) => None,
            _ => {
                return Err(AppError::Database(format!(
                    "Metadata {} has a partial after_key",
                    self.id
                )))
            }
        };
        let metadata = RollupMetadata {
            id: self.id,
            rollup_id: self.rollup_id,
            status,
            after_key,
            last_updated_time: self.last_updated_time,
            documents_processed: self.documents_processed,
            rollups_indexed: self.rollups_indexed,
            failure_reason: self.failure_reason,
        };
        Ok(Versioned::new(metadata, self.version))
    }
}

pub(crate) async fn find_rollup(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Versioned<Rollup>>> {
    let row = sqlx::query_as::<_, RollupRow>("SELECT * FROM rollups WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    row.map(RollupRow::into_versioned).transpose()
}

pub(crate) async fn insert_rollup(conn: &mut SqliteConnection, rollup: &Rollup) -> Result<i64> {
    sqlx::query(
        r#"
        INSERT INTO rollups (
            id, version, schema_version, enabled, enabled_time, last_updated_time,
            metadata_id, schedule, continuous, description,
            source_index, target_index, dimensions, metrics, page_size, delay_ms
        ) VALUES (?, 1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&rollup.id)
    .bind(rollup.schema_version)
    .bind(rollup.enabled)
    .bind(rollup.enabled_time)
    .bind(rollup.last_updated_time)
    .bind(&rollup.metadata_id)
    .bind(serde_json::to_string(&rollup.schedule)?)
    .bind(rollup.continuous)
    .bind(&rollup.description)
    .bind(&rollup.source_index)
    .bind(&rollup.target_index)
    .bind(serde_json::to_string(&rollup.dimensions)?)
    .bind(serde_json::to_string(&rollup.metrics)?)
    .bind(rollup.page_size)
    .bind(rollup.delay_ms)
    .execute(&mut *conn)
    .await
    .map_err(|e| match map_sqlx_error(e) {
        AppError::Conflict(_) => AppError::Conflict(format!("Rollup {} already exists", rollup.id)),
        other => other,
    })?;
    Ok(1)
}

/// Update the control fields of a rollup if its version still matches
///
/// Aggregation parameters are immutable after creation and never rewritten.
pub(crate) async fn update_rollup(
    conn: &mut SqliteConnection,
    rollup: &Rollup,
    expected_version: i64,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        UPDATE rollups
        SET enabled = ?, enabled_time = ?, last_updated_time = ?, metadata_id = ?,
            version = version + 1
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(rollup.enabled)
    .bind(rollup.enabled_time)
    .bind(rollup.last_updated_time)
    .bind(&rollup.metadata_id)
    .bind(&rollup.id)
    .bind(expected_version)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    if result.rows_affected() == 1 {
        return Ok(expected_version + 1);
    }

    let current: Option<i64> = sqlx::query_scalar("SELECT version FROM rollups WHERE id = ?")
        .bind(&rollup.id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    match current {
        None => Err(AppError::NotFound(format!("Rollup {} not found", rollup.id))),
        Some(version) => Err(AppError::Conflict(format!(
            "Rollup {} version {} != expected {}",
            rollup.id, version, expected_version
        ))),
    }
}

pub(crate) async fn find_metadata(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Versioned<RollupMetadata>>> {
    let row = sqlx::query_as::<_, MetadataRow>("SELECT * FROM rollup_metadata WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    row.map(MetadataRow::into_versioned).transpose()
}

pub(crate) async fn insert_metadata(
    conn: &mut SqliteConnection,
    metadata: &RollupMetadata,
) -> Result<i64> {
    sqlx::query(
        r#"
        INSERT INTO rollup_metadata (
            id, version, rollup_id, status, after_key_timestamp, after_key_doc_id,
            last_updated_time, documents_processed, rollups_indexed, failure_reason
        ) VALUES (?, 1, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&metadata.id)
    .bind(&metadata.rollup_id)
    .bind(metadata.status.to_string())
    .bind(metadata.after_key.as_ref().map(|k| k.timestamp))
    .bind(metadata.after_key.as_ref().map(|k| k.doc_id.as_str()))
    .bind(metadata.last_updated_time)
    .bind(metadata.documents_processed)
    .bind(metadata.rollups_indexed)
    .bind(&metadata.failure_reason)
    .execute(&mut *conn)
    .await
    .map_err(|e| match map_sqlx_error(e) {
        AppError::Conflict(_) => {
            AppError::Conflict(format!("Metadata {} already exists", metadata.id))
        }
        other => other,
    })?;
    Ok(1)
}

pub(crate) async fn update_metadata(
    conn: &mut SqliteConnection,
    metadata: &RollupMetadata,
    expected_version: i64,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        UPDATE rollup_metadata
        SET status = ?, after_key_timestamp = ?, after_key_doc_id = ?,
            last_updated_time = ?, documents_processed = ?, rollups_indexed = ?,
            failure_reason = ?, version = version + 1
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(metadata.status.to_string())
    .bind(metadata.after_key.as_ref().map(|k| k.timestamp))
    .bind(metadata.after_key.as_ref().map(|k| k.doc_id.as_str()))
    .bind(metadata.last_updated_time)
    .bind(metadata.documents_processed)
    .bind(metadata.rollups_indexed)
    .bind(&metadata.failure_reason)
    .bind(&metadata.id)
    .bind(expected_version)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    if result.rows_affected() == 1 {
        return Ok(expected_version + 1);
    }

    let current: Option<i64> =
        sqlx::query_scalar("SELECT version FROM rollup_metadata WHERE id = ?")
            .bind(&metadata.id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
    match current {
        None => Err(AppError::NotFound(format!(
            "Metadata {} not found",
            metadata.id
        ))),
        Some(version) => Err(AppError::Conflict(format!(
            "Metadata {} version {} != expected {}",
            metadata.id, version, expected_version
        ))),
    }
}
