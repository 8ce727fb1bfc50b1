//! Telemetry setup for OpenTelemetry integration
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g., http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name (default: rollup-engine)
//!
//! ```text
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//! OTEL_SERVICE_NAME=rollup-dev \
//!     ./rollup-engine
//! ```

use anyhow::Result;
use tracing_subscriber::{Layer, Registry};

pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

const DEFAULT_SERVICE_NAME: &str = "rollup-engine";

/// Outcome of telemetry initialisation, logged once the subscriber is up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryStatus {
    NotConfigured,
    Enabled { endpoint: String, service_name: String },
    FeatureDisabled,
}

/// Build the OpenTelemetry layer if an endpoint is configured
pub fn otel_layer() -> Result<(Option<BoxedLayer>, TelemetryStatus)> {
    let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return Ok((None, TelemetryStatus::NotConfigured));
    };
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string());

    #[cfg(feature = "telemetry")]
    {
        let layer = build_layer(&endpoint, &service_name)?;
        Ok((
            Some(layer),
            TelemetryStatus::Enabled {
                endpoint,
                service_name,
            },
        ))
    }

    #[cfg(not(feature = "telemetry"))]
    {
        let _ = (endpoint, service_name);
        Ok((None, TelemetryStatus::FeatureDisabled))
    }
}

#[cfg(feature = "telemetry")]
fn build_layer(endpoint: &str, service_name: &str) -> Result<BoxedLayer> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::{SpanExporter, WithExportConfig};
    use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.to_string(),
        )]))
        .build();
    let tracer = provider.tracer(service_name.to_string());
    opentelemetry::global::set_tracer_provider(provider);

    Ok(tracing_opentelemetry::layer().with_tracer(tracer).boxed())
}

/// Flush pending spans
pub fn shutdown() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}
