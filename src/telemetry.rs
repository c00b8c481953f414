//! Logging and span export

use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{SpanExporter, TracingConfig};
use crate::error::{BootstrapError, BootstrapResult};
use crate::lifecycle::Closer;

/// Span tracer backed by an OpenTelemetry provider
pub struct Tracer {
    provider: SdkTracerProvider,
    service_name: String,
}

impl Tracer {
    pub fn new(config: &TracingConfig) -> BootstrapResult<Self> {
        let service_name = config.service_name.trim();
        if service_name.is_empty() {
            return Err(BootstrapError::Tracer {
                message: "service name cannot be empty".to_string(),
            });
        }

        let resource = Resource::builder()
            .with_service_name(service_name.to_string())
            .build();
        let mut builder = SdkTracerProvider::builder().with_resource(resource);
        if config.exporter == SpanExporter::Stdout {
            builder = builder.with_simple_exporter(opentelemetry_stdout::SpanExporter::default());
        }

        Ok(Self {
            provider: builder.build(),
            service_name: service_name.to_string(),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Layer bridging `tracing` spans into this tracer
    pub fn layer<S>(&self) -> OpenTelemetryLayer<S, SdkTracer>
    where
        S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    {
        tracing_opentelemetry::layer().with_tracer(self.provider.tracer(self.service_name.clone()))
    }
}

impl Closer for Tracer {
    fn close(&self) -> BootstrapResult<()> {
        let flushed = self.provider.force_flush();
        let shut = self.provider.shutdown();

        flushed
            .and(shut)
            .map_err(|e| BootstrapError::Tracer {
                message: e.to_string(),
            })?;

        tracing::debug!(service = %self.service_name, "Tracer closed");
        Ok(())
    }
}

/// Install the process-wide subscriber.
///
/// `format` is `pretty` or `json` (anything else falls back to json, matching
/// the CLI default).
pub fn init_logging(level: &str, format: &str, tracer: &Tracer) -> Result<()> {
    let filter = EnvFilter::try_new(level)?;
    let output = match format {
        "pretty" => fmt::layer().boxed(),
        _ => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .with(tracer.layer())
        .try_init()?;

    Ok(())
}
