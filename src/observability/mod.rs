pub mod exporter;
pub mod logging;

use anyhow::{Context, Result};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use tracing::dispatcher::set_global_default;
use tracing::level_filters::LevelFilter;
use tracing::Subscriber;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, EnvFilter, Layer, Registry};

use crate::configuration::LogFormat;

pub use exporter::ExporterTarget;
pub use logging::{init_log, LogPipeline, PipelineError};

/// Crates whose events would feed back into the exporter that produced them.
const EXPORT_STACK_TARGETS: [&str; 7] = [
    "hyper",
    "h2",
    "tonic",
    "tower",
    "opentelemetry",
    "opentelemetry_sdk",
    "opentelemetry_otlp",
];

/// Compose multiple layers into a `tracing`'s subscriber.
///
/// The OpenTelemetry bridge sees every event that passes `env_filter`, except
/// the ones emitted by the export stack itself. `format` only controls the
/// local copy written to `sink`.
///
/// # Implementation Notes
///
/// We are using `impl Subscriber` as return type to avoid having to spell out the actual
/// type of the returned subscriber, which is indeed quite complex.
pub fn get_subscriber<Sink>(
    name: String,
    env_filter: String,
    format: LogFormat,
    sink: Sink,
    logger_provider: &SdkLoggerProvider,
) -> impl Subscriber + Sync + Send
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    let (bunyan, pretty) = match format {
        LogFormat::Bunyan => (Some(BunyanFormattingLayer::new(name, sink)), None),
        LogFormat::Pretty => (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(sink)),
        ),
        LogFormat::Disabled => (None, None),
    };
    let json_storage = bunyan.as_ref().map(|_| JsonStorageLayer);

    let bridge_filter = EXPORT_STACK_TARGETS
        .iter()
        .fold(Targets::new().with_default(LevelFilter::TRACE), |targets, target| {
            targets.with_target(*target, LevelFilter::OFF)
        });
    let otel_logger = OpenTelemetryTracingBridge::new(logger_provider).with_filter(bridge_filter);

    Registry::default()
        .with(env_filter)
        .with(json_storage)
        .with(bunyan)
        .with(pretty)
        .with(otel_logger)
}

/// Register a subscriber as global default and route `log` records into it.
///
/// It should only be called once!
pub fn init_subscriber(subscriber: impl Subscriber + Sync + Send) -> Result<()> {
    LogTracer::init().context("failed to set logger")?;
    set_global_default(subscriber.into()).context("failed to set subscriber")?;
    Ok(())
}
