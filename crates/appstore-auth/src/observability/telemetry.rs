//! OpenTelemetry span export
//!
//! Spans go out over OTLP/gRPC tagged with the service name, the crate
//! version and the configured resource attributes, which always include the
//! account mode.

use opentelemetry::{Key, KeyValue};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::Result;
use crate::config::TelemetryConfig;

static TRACER_PROVIDER: std::sync::OnceLock<SdkTracerProvider> = std::sync::OnceLock::new();

fn service_resource(config: &TelemetryConfig) -> Resource {
    let attributes = config
        .resource_attributes
        .iter()
        .map(|(key, value)| KeyValue::new(Key::from(key.clone()), value.clone()));

    Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .with_attributes(attributes)
        .build()
}

/// Initialize logging with an OTLP span exporter when an endpoint is set
pub fn init_telemetry(config: &TelemetryConfig) -> Result<()> {
    let (filter, fmt_layer) = super::fmt_layers(config);

    if let Some(ref endpoint) = config.otlp_endpoint {
        let resource = service_resource(config);

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to create OTLP exporter: {e}")))?;

        let provider = SdkTracerProvider::builder()
            .with_resource(resource)
            .with_batch_exporter(exporter)
            .build();

        let tracer = provider.tracer(config.service_name.clone());
        let _ = TRACER_PROVIDER.set(provider);

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .with(filter)
            .with(otel_layer)
            .init();

        tracing::info!(
            endpoint = %endpoint,
            attributes = config.resource_attributes.len(),
            "OpenTelemetry span export enabled"
        );
    } else {
        tracing_subscriber::registry()
            .with(fmt_layer)
            .with(filter)
            .init();

        tracing::debug!("OpenTelemetry disabled (no endpoint configured)");
    }

    Ok(())
}

/// Flush pending spans
pub fn shutdown_telemetry() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(e) = provider.shutdown()
    {
        tracing::warn!("Failed to shutdown tracer provider: {e:?}");
    }
}
