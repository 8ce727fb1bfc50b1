//! Shared fixture: the full engine wired over a SQLite database

#![allow(dead_code)]

use rollup_core::application::{
    ConflictRetry, PutRollupRequest, RollupControl, RollupRunner, RunnerConfig,
};
use rollup_core::domain::{Dimension, MetricConfig, MetricKind, SourceRecord};
use rollup_core::port::id_provider::{SequentialIdProvider, UuidProvider};
use rollup_core::port::time_provider::ManualTimeProvider;
use rollup_infra_sqlite::{create_pool, run_migrations, SqliteDocumentStore, SqliteRollupRepository};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const NOW: i64 = 1_000_000;
pub const SOURCE: &str = "rides";
pub const TARGET: &str = "rides_rollup";

pub struct Engine {
    pub repo: Arc<SqliteRollupRepository>,
    pub docs: Arc<SqliteDocumentStore>,
    pub clock: Arc<ManualTimeProvider>,
    pub control: Arc<RollupControl>,
    pub runner: Arc<RollupRunner>,
}

impl Engine {
    pub async fn in_memory() -> Self {
        Self::open("sqlite::memory:", RunnerConfig::default()).await
    }

    pub async fn open(database_url: &str, config: RunnerConfig) -> Self {
        let pool = create_pool(database_url).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let repo = Arc::new(SqliteRollupRepository::new(pool.clone()));
        let docs = Arc::new(SqliteDocumentStore::new(pool));
        let clock = Arc::new(ManualTimeProvider::new(NOW));
        let retry = ConflictRetry::new(5, Duration::from_millis(1));

        let control = Arc::new(RollupControl::new(
            repo.clone(),
            repo.clone(),
            Arc::new(SequentialIdProvider::new("rollup")),
            clock.clone(),
            retry.clone(),
        ));
        let runner = Arc::new(RollupRunner::new(
            repo.clone(),
            repo.clone(),
            repo.clone(),
            docs.clone(),
            docs.clone(),
            Arc::new(UuidProvider),
            clock.clone(),
            retry,
            config,
        ));

        Self {
            repo,
            docs,
            clock,
            control,
            runner,
        }
    }

    pub async fn index(&self, records: Vec<SourceRecord>) {
        self.docs.index_source(SOURCE, &records).await.unwrap();
    }
}

/// Rides rolled up per minute and zone, two records per window
pub fn rides_rollup(id: &str) -> PutRollupRequest {
    PutRollupRequest {
        id: Some(id.to_string()),
        source_index: SOURCE.to_string(),
        target_index: TARGET.to_string(),
        dimensions: vec![
            Dimension::date_histogram("ts", 60_000),
            Dimension::terms("zone"),
        ],
        metrics: vec![MetricConfig {
            source_field: "fare".to_string(),
            target_field: "fare".to_string(),
            kinds: vec![
                MetricKind::Min,
                MetricKind::Max,
                MetricKind::Sum,
                MetricKind::ValueCount,
            ],
        }],
        page_size: Some(2),
        ..Default::default()
    }
}

pub fn ride(doc_id: &str, ts: i64, zone: &str, fare: f64) -> SourceRecord {
    SourceRecord::new(doc_id, ts, json!({"ts": ts, "zone": zone, "fare": fare}))
}

/// Five rides in two minutes and two zones
pub fn five_rides() -> Vec<SourceRecord> {
    vec![
        ride("r1", 0, "a", 10.0),
        ride("r2", 1_000, "a", 20.0),
        ride("r3", 2_000, "b", 5.0),
        ride("r4", 61_000, "a", 7.0),
        ride("r5", 62_000, "b", 3.0),
    ]
}

/// SQLite file under the temp dir, removed with its WAL files on drop
pub struct TempDb {
    path: PathBuf,
}

impl TempDb {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "rollup_it_{}_{}.db",
            name,
            std::process::id()
        ));
        Self::cleanup(&path);
        Self { path }
    }

    pub fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }

    fn cleanup(path: &PathBuf) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        Self::cleanup(&self.path);
    }
}
