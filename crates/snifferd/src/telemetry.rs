//! Logging and OpenTelemetry initialization.
//!
//! Always installs an `EnvFilter` and a fmt layer. When an OTLP endpoint is
//! configured, spans are also exported over gRPC.

use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};
use opentelemetry_sdk::Resource;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout for OTLP exports - prevents blocking on unavailable endpoints
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

const SERVICE_NAME: &str = "snifferd";

/// Install the global subscriber.
///
/// `log_level` is an `EnvFilter` directive string such as `info` or
/// `snifferd=debug,warn`; an invalid one falls back to `info`.
pub fn init(log_level: &str, otlp_endpoint: Option<&str>) -> Result<()> {
    let env_filter = filter(log_level);

    let telemetry_layer = match otlp_endpoint {
        Some(endpoint) => {
            let resource = Resource::builder_empty()
                .with_service_name(SERVICE_NAME)
                .with_attributes(vec![KeyValue::new(
                    "service.version",
                    env!("CARGO_PKG_VERSION"),
                )])
                .build();

            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint_url(endpoint))
                .with_timeout(EXPORT_TIMEOUT)
                .build()
                .context("Failed to create OTLP span exporter")?;

            let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
                .with_span_processor(
                    opentelemetry_sdk::trace::BatchSpanProcessor::builder(exporter).build(),
                )
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource)
                .build();

            let tracer = tracer_provider.tracer(SERVICE_NAME);
            global::set_tracer_provider(tracer_provider);
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    match otlp_endpoint {
        Some(endpoint) => info!(otlp.endpoint = %endpoint, "Exporting traces over OTLP"),
        None => debug!("OTLP export disabled"),
    }

    Ok(())
}

fn filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Accepts `host:port` or a full URL.
fn endpoint_url(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint_url("127.0.0.1:4317"), "http://127.0.0.1:4317");
        assert_eq!(endpoint_url("https://otel:4317"), "https://otel:4317");
    }
}
