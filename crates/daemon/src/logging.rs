// Logging initialisation
use crate::config::LogFormat;
use crate::telemetry::{self, TelemetryStatus};
use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "rollup=info";

/// Install the global subscriber
///
/// `RUST_LOG` wins over the default filter. JSON output is meant for
/// production, pretty output for development.
pub fn init_logging(format: LogFormat) -> Result<TelemetryStatus> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))?;
    let (otel, status) = telemetry::otel_layer()?;

    let registry = tracing_subscriber::registry().with(otel).with(env_filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init()?,
    }
    Ok(status)
}
