//! Tracing setup: log formatting, optional file output, optional
//! OpenTelemetry export.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Filter directives (default: `storybench=info`)
//! - `STORYBENCH_LOG_FORMAT`: `json` for structured output, anything else
//!   gets the pretty developer format
//! - `STORYBENCH_LOG_DIR`: when set, also write daily-rolled log files there
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g. http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name (default: storybench-daemon)

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

type OtelLayer = Option<Box<dyn tracing_subscriber::Layer<Registry> + Send + Sync>>;

/// Install the global tracing subscriber.
///
/// Returns the guard that keeps the non-blocking file writer flushing;
/// hold it for the lifetime of the process.
pub fn init() -> Result<Option<WorkerGuard>> {
    let log_format =
        std::env::var("STORYBENCH_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("storybench=info"))?;

    let mut guard = None;
    let file_layer = match std::env::var("STORYBENCH_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "storybenchd.log");
            let (writer, g) = tracing_appender::non_blocking(appender);
            guard = Some(g);
            Some(fmt::layer().with_ansi(false).with_writer(writer))
        }
        Err(_) => None,
    };

    // json for production, pretty for development
    let json = log_format == "json";
    tracing_subscriber::registry()
        .with(otel_layer()?)
        .with(env_filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer().pretty()))
        .with(file_layer)
        .init();

    Ok(guard)
}

#[cfg(feature = "telemetry")]
fn otel_layer() -> Result<OtelLayer> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;

    let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return Ok(None);
    };

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "storybench-daemon".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()?;
    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .build();
    opentelemetry::global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(service_name);

    Ok(Some(Box::new(
        tracing_opentelemetry::layer().with_tracer(tracer),
    )))
}

#[cfg(not(feature = "telemetry"))]
fn otel_layer() -> Result<OtelLayer> {
    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        eprintln!(
            "OTEL_EXPORTER_OTLP_ENDPOINT is set but this build lacks the 'telemetry' feature; \
             rebuild with: cargo build --features telemetry"
        );
    }
    Ok(None)
}
