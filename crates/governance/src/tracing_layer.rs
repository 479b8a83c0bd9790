//! Distributed tracing configuration.

use code_runner_core::{Error, Result};
use opentelemetry::{trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,code_runner=debug";

/// Configure logging (plain or JSON) and, when `OTEL_EXPORTER_OTLP_ENDPOINT`
/// is set, OpenTelemetry trace export.
pub fn configure_tracing(json_logs: bool) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into()),
    );

    // Exactly one of these is present
    let json_layer = json_logs.then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!json_logs).then(|| tracing_subscriber::fmt::layer());

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer);

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        tracing::info!(endpoint = %endpoint, "Initializing OpenTelemetry tracing");

        let provider = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint),
            )
            .with_trace_config(
                sdktrace::Config::default().with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    "code-runner",
                )])),
            )
            .install_batch(runtime::Tokio)
            .map_err(|e| Error::internal(format!("Failed to install OTLP pipeline: {}", e)))?;

        let tracer = provider.tracer("code-runner");
        opentelemetry::global::set_tracer_provider(provider);
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        registry
            .with(otel_layer)
            .try_init()
            .map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))?;
    } else {
        registry
            .try_init()
            .map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))?;
    }

    Ok(())
}
