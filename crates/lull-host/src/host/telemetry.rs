//! # Telemetry Features
//!
//! The host always logs human-readable events through `tracing_subscriber`.
//! On top of that it can export OpenTelemetry spans and metrics.
//!
//! ## Feature matrix
//!
//! - `tracing`: Enables logging in `lull` and OpenTelemetry tracing (via
//!   spans).
//! - `metrics`: Enables the coordinator's OpenTelemetry metrics
//!   (`tasks_dispatched`, `tasks_inflight`, `task_failures`, `task_duration`,
//!   `auto_closes`).
//! - `stdout`: Enables the stdout exporter.
//!
//! ## Feature constraints
//!
//! - `stdout` requires at least one of `tracing` or `metrics`.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --bin lull-host --features tracing,metrics,stdout
//! ```

#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider},
};
#[cfg(all(feature = "stdout", any(feature = "metrics", feature = "tracing")))]
use std::time::Duration;

/// How often the stdout exporters push what they have collected.
#[cfg(all(feature = "stdout", any(feature = "metrics", feature = "tracing")))]
const EXPORT_INTERVAL: Duration = Duration::from_secs(5);

/// The installed subscriber and its exporters.
///
/// Hold it for the life of the process. Dropping it flushes and shuts down
/// whatever exporters are compiled in; failures there go to stderr since the
/// process is on its way out.
#[must_use = "exporters are shut down when this is dropped"]
pub struct Telemetry {
    #[cfg(feature = "tracing")]
    tracer_provider: SdkTracerProvider,
    #[cfg(feature = "metrics")]
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    /// Installs the global subscriber, propagator and providers.
    ///
    /// Fails if a global subscriber is already set.
    pub fn install() -> anyhow::Result<Self> {
        #[cfg(any(feature = "metrics", feature = "tracing"))]
        let resource = resource();
        #[cfg(any(feature = "metrics", feature = "tracing"))]
        let scope = InstrumentationScope::builder("lull")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();

        #[cfg_attr(not(any(feature = "metrics", feature = "tracing")), allow(unused_mut))]
        let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![fmt_layer()];

        #[cfg(feature = "tracing")]
        let tracer_provider = {
            let provider = tracer_provider(resource.clone());
            layers.push(
                tracing_opentelemetry::layer()
                    .with_tracer(provider.tracer_with_scope(scope.clone()))
                    .with_error_records_to_exceptions(true)
                    .boxed(),
            );
            provider
        };

        #[cfg(feature = "metrics")]
        let meter_provider = {
            let provider = meter_provider(resource);
            layers.push(tracing_opentelemetry::MetricsLayer::new(provider.clone()).boxed());
            provider
        };

        tracing_subscriber::registry()
            .with(layers)
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
            .try_init()?;

        // Globals are only touched once the subscriber is ours, so a failed
        // install leaves the process as it found it.
        #[cfg(feature = "tracing")]
        {
            opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
            opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        }
        #[cfg(feature = "metrics")]
        {
            opentelemetry::global::set_meter_provider(meter_provider.clone());
            lull::init_metric_handles(opentelemetry::global::meter_with_scope(scope));
        }

        Ok(Self {
            #[cfg(feature = "tracing")]
            tracer_provider,
            #[cfg(feature = "metrics")]
            meter_provider,
        })
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        #[cfg(feature = "tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

/// Human-readable events on stderr, leaving stdout to the job protocol.
fn fmt_layer() -> Box<dyn Layer<Registry> + Send + Sync> {
    tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .boxed()
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("lull-host")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "tracing")]
fn tracer_provider(resource: Resource) -> SdkTracerProvider {
    let builder = SdkTracerProvider::builder().with_resource(resource);

    #[cfg(feature = "stdout")]
    let builder = builder.with_span_processor(
        BatchSpanProcessor::builder(opentelemetry_stdout::SpanExporter::default())
            .with_batch_config(
                BatchConfigBuilder::default()
                    .with_scheduled_delay(EXPORT_INTERVAL)
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build(),
    );

    builder.build()
}

#[cfg(feature = "metrics")]
fn meter_provider(resource: Resource) -> SdkMeterProvider {
    let builder = SdkMeterProvider::builder().with_resource(resource);

    #[cfg(feature = "stdout")]
    let builder = builder.with_reader(
        PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
            .with_interval(EXPORT_INTERVAL)
            .build(),
    );

    builder.build()
}
