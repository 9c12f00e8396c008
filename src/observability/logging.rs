use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use opentelemetry_sdk::error::OTelSdkError;
use opentelemetry_sdk::logs::{
    BatchLogProcessor, LogExporter, LoggerProviderBuilder, SdkLoggerProvider, SimpleLogProcessor,
};
use opentelemetry_sdk::Resource;

use crate::configuration::{ProcessorMode, ProcessorSettings, Settings};

use super::exporter::{otlp_exporter, ExporterTarget};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid exporter configuration: {0}")]
    ConnectionConfig(String),
    #[error("failed to build the otlp log exporter")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),
    #[error("logger provider failed to shut down")]
    Shutdown(#[from] OTelSdkError),
    #[error("logger provider did not drain within {0:?}, pending records were dropped")]
    ShutdownTimedOut(Duration),
    #[error("failed to spawn the shutdown thread")]
    ShutdownThread(#[source] std::io::Error),
}

/// A wired logger provider: one resource, at most one processor, one exporter.
///
/// Dropping the pipeline without calling [`LogPipeline::shutdown`] still
/// shuts the provider down once every clone of it is gone, but without a
/// bound on how long that takes.
#[derive(Debug)]
pub struct LogPipeline {
    provider: SdkLoggerProvider,
    grace_period: Duration,
}

impl LogPipeline {
    pub fn with_exporter<E>(
        resource: Resource,
        exporter: E,
        processor: &ProcessorSettings,
        grace_period: Duration,
    ) -> Self
    where
        E: LogExporter + 'static,
    {
        let builder = SdkLoggerProvider::builder().with_resource(resource);
        let provider = with_processor(builder, exporter, processor).build();

        Self {
            provider,
            grace_period,
        }
    }

    /// A provider without processors. Log calls still go through the bridge
    /// but nothing is exported.
    pub fn disabled(resource: Resource, grace_period: Duration) -> Self {
        Self {
            provider: SdkLoggerProvider::builder().with_resource(resource).build(),
            grace_period,
        }
    }

    pub fn provider(&self) -> &SdkLoggerProvider {
        &self.provider
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn force_flush(&self) -> Result<(), PipelineError> {
        Ok(self.provider.force_flush()?)
    }

    /// Flushes and shuts the provider down, waiting at most the grace period.
    ///
    /// The shutdown runs on its own thread so a slow exporter cannot hold the
    /// caller past the grace period. Records still queued when it elapses are
    /// lost once the process exits.
    pub fn shutdown(self) -> Result<(), PipelineError> {
        let (sender, receiver) = mpsc::sync_channel(1);
        let provider = self.provider.clone();

        thread::Builder::new()
            .name("log-pipeline-shutdown".into())
            .spawn(move || {
                let _ = sender.send(provider.shutdown());
            })
            .map_err(PipelineError::ShutdownThread)?;

        match receiver.recv_timeout(self.grace_period) {
            Ok(result) => Ok(result?),
            Err(_) => Err(PipelineError::ShutdownTimedOut(self.grace_period)),
        }
    }
}

fn with_processor<E>(
    builder: LoggerProviderBuilder,
    exporter: E,
    processor: &ProcessorSettings,
) -> LoggerProviderBuilder
where
    E: LogExporter + 'static,
{
    match processor.mode {
        ProcessorMode::Synchronous => builder.with_log_processor(SimpleLogProcessor::new(exporter)),
        ProcessorMode::Batched => builder.with_log_processor(
            BatchLogProcessor::builder(exporter)
                .with_batch_config(processor.batch_config())
                .build(),
        ),
    }
}

pub fn init_log(settings: &Settings) -> Result<LogPipeline, PipelineError> {
    let target = ExporterTarget::parse(&settings.exporter.target, settings.exporter.insecure)?;
    let resource = settings.get_resource();
    let grace_period = settings.shutdown.grace_period();

    let pipeline = match target {
        ExporterTarget::Console => LogPipeline::with_exporter(
            resource,
            opentelemetry_stdout::LogExporter::default(),
            &settings.processor,
            grace_period,
        ),
        ExporterTarget::Otlp { endpoint, insecure } => LogPipeline::with_exporter(
            resource,
            otlp_exporter(&endpoint, insecure, &settings.exporter)?,
            &settings.processor,
            grace_period,
        ),
        ExporterTarget::Disabled => LogPipeline::disabled(resource, grace_period),
    };

    Ok(pipeline)
}
