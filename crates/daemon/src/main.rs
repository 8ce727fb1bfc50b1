//! Rollup Engine - Main Entry Point
//!
//! Wires the SQLite adapters, the JSON-RPC control surface and the
//! scheduling worker together.

mod config;
mod logging;
mod telemetry;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::telemetry::TelemetryStatus;
use rollup_api_rpc::{RpcServer, RpcServerConfig};
use rollup_core::application::worker::constants::DEFAULT_CONFLICT_BACKOFF;
use rollup_core::application::{
    shutdown_channel, ConflictRetry, RecoveryService, RollupControl, RollupRunner, RollupWorker,
    RunnerConfig, Scheduler,
};
use rollup_core::port::id_provider::UuidProvider;
use rollup_core::port::time_provider::SystemTimeProvider;
use rollup_infra_sqlite::{create_pool, run_migrations, SqliteDocumentStore, SqliteRollupRepository};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let config = DaemonConfig::load()?;
    match logging::init_logging(config.log_format)? {
        TelemetryStatus::Enabled {
            endpoint,
            service_name,
        } => info!(endpoint = %endpoint, service_name = %service_name, "OpenTelemetry enabled"),
        TelemetryStatus::FeatureDisabled => warn!(
            "OTEL_EXPORTER_OTLP_ENDPOINT set but feature 'telemetry' not enabled"
        ),
        TelemetryStatus::NotConfigured => {}
    }

    info!("Rollup Engine v{} starting...", VERSION);
    info!(
        db_path = %config.db_path,
        rpc_port = config.rpc_port,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        resume_policy = ?config.resume_policy,
        "Configuration loaded"
    );

    // 2. Database
    config.prepare_storage()?;
    let pool = create_pool(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 3. Dependencies
    let time_provider = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);
    let repository = Arc::new(SqliteRollupRepository::new(pool.clone()));
    let documents = Arc::new(SqliteDocumentStore::new(pool.clone()));
    let retry = ConflictRetry::new(config.conflict_retries, DEFAULT_CONFLICT_BACKOFF);

    // 4. Reconcile stops interrupted by a previous crash
    let recovery = RecoveryService::new(
        repository.clone(),
        repository.clone(),
        time_provider.clone(),
        retry.clone(),
    );
    match recovery.reconcile().await {
        Ok(count) => info!(stopped_count = count, "Recovery completed"),
        Err(e) => error!(error = %e, "Recovery failed"),
    }

    // 5. JSON-RPC server
    let control = Arc::new(RollupControl::new(
        repository.clone(),
        repository.clone(),
        id_provider.clone(),
        time_provider.clone(),
        retry.clone(),
    ));
    let rpc_config = RpcServerConfig {
        host: config.rpc_host.clone(),
        port: config.rpc_port,
    };
    let (rpc_addr, rpc_handle) = RpcServer::new(rpc_config, control)
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    // 6. Worker
    let runner = Arc::new(RollupRunner::new(
        repository.clone(),
        repository.clone(),
        repository.clone(),
        documents.clone(),
        documents,
        id_provider,
        time_provider.clone(),
        retry,
        RunnerConfig {
            resume_policy: config.resume_policy,
        },
    ));
    let scheduler = Arc::new(Scheduler::new(time_provider));
    let worker = RollupWorker::new(repository, runner, scheduler)
        .with_poll_interval(config.poll_interval);

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run(shutdown_rx).await {
            error!(error = %e, "Worker failed");
        }
    });

    info!(rpc_addr = %rpc_addr, "System ready. Press Ctrl+C to shutdown");

    // 7. Graceful shutdown
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown_tx.shutdown();
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    if tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, worker_handle)
        .await
        .is_err()
    {
        warn!("Worker did not stop within timeout");
    }
    pool.close().await;
    telemetry::shutdown();

    info!("Shutdown complete");
    Ok(())
}
