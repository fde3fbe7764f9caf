// Telemetry: structured logging, OTLP tracing and Prometheus metrics

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "connector-pipeline";

/// Initialize structured logging with JSON formatting
///
/// `RUST_LOG` takes precedence over `log_level`. When `tracing_endpoint` is
/// set, spans are also exported over OTLP.
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized"
    );

    Ok(())
}

fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(endpoint = endpoint, "OpenTelemetry tracer initialized");

    Ok(tracer)
}

/// Flush remaining spans on shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus exporter and describe the pipeline metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "connector_jobs_total",
        "Queue jobs resolved by the processor, labelled by outcome"
    );
    describe_histogram!(
        "connector_job_duration_seconds",
        "Handler duration of queue jobs in seconds"
    );
    describe_counter!(
        "connector_jobs_claimed",
        "Jobs claimed from the queue by the processor"
    );
    describe_counter!(
        "connector_jobs_cleaned_total",
        "Finished jobs removed by retention cleanup"
    );
    describe_counter!(
        "connector_jobs_enqueued_total",
        "Connector jobs enqueued, labelled by trigger source"
    );
    describe_counter!(
        "connector_files_total",
        "Files transferred by connector runs, labelled by direction and outcome"
    );

    tracing::info!(metrics_port = metrics_port, "Prometheus metrics exporter initialized");

    Ok(())
}

/// Outcome of one processed queue job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Finished,
    Retried,
    Failed,
}

impl JobOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Finished => "finished",
            JobOutcome::Retried => "retried",
            JobOutcome::Failed => "failed",
        }
    }
}

#[inline]
pub fn record_job_outcome(job_name: &str, outcome: JobOutcome) {
    counter!(
        "connector_jobs_total",
        "job_name" => job_name.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

#[inline]
pub fn record_job_duration(job_name: &str, duration_seconds: f64) {
    histogram!("connector_job_duration_seconds", "job_name" => job_name.to_string())
        .record(duration_seconds);
}

#[inline]
pub fn record_jobs_claimed(count: u64) {
    counter!("connector_jobs_claimed").increment(count);
}

#[inline]
pub fn record_jobs_cleaned(count: u64) {
    counter!("connector_jobs_cleaned_total").increment(count);
}

#[inline]
pub fn record_job_enqueued(job_name: &str, triggered_by: &str) {
    counter!(
        "connector_jobs_enqueued_total",
        "job_name" => job_name.to_string(),
        "triggered_by" => triggered_by.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_file_transfer(direction: &'static str, success: bool) {
    counter!(
        "connector_files_total",
        "direction" => direction,
        "outcome" => if success { "success" } else { "error" }
    )
    .increment(1);
}
