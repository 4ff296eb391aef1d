use crate::errors::Error;
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Tracer, TracerProvider};
use opentelemetry_sdk::{Resource, trace};
use std::env;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

const SERVICE_NAME: &str = "node-reboot-agent";

/// Create a tracing_subscriber layer which exports traces to the given OTLP endpoint.
/// The returned TracerProvider must stay in scope for as long as traces should be
/// exported; dropping it silently stops the exporter.
fn setup_otlp_layer(
    endpoint: &str,
) -> Result<(TracerProvider, OpenTelemetryLayer<Registry, Tracer>), Error> {
    let otlp_exporter = opentelemetry_otlp::new_exporter()
        .http()
        .with_endpoint(endpoint)
        .build_span_exporter()?;

    let provider = TracerProvider::builder()
        .with_simple_exporter(otlp_exporter)
        .with_config(
            trace::config()
                .with_resource(Resource::new(vec![KeyValue::new("service.name", SERVICE_NAME)])),
        )
        .build();

    let tracer = provider.tracer(SERVICE_NAME);
    let layer = tracing_opentelemetry::layer().with_tracer(tracer);

    Ok((provider, layer))
}

/// Log to the console, filtered by `RUST_LOG`, and additionally export spans
/// when `OTLP_ENDPOINT` is set.
pub fn setup_tracing() -> Result<Option<TracerProvider>, Error> {
    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_filter(EnvFilter::from_default_env());

    let mut layers = Vec::new();
    let mut provider = None;
    if let Ok(endpoint) = env::var("OTLP_ENDPOINT") {
        let (tracer_provider, exporter_layer) = setup_otlp_layer(&endpoint)?;
        layers.push(
            exporter_layer
                .with_filter(EnvFilter::from_default_env())
                .boxed(),
        );
        provider = Some(tracer_provider);
    }
    layers.push(console_layer.boxed());
    tracing::subscriber::set_global_default(Registry::default().with(layers))?;

    if provider.is_some() {
        tracing::info!(service = SERVICE_NAME, "exporting traces over OTLP");
    }
    Ok(provider)
}
