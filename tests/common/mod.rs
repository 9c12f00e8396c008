#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opentelemetry::logs::{AnyValue, Severity};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::logs::{LogBatch, LogExporter, SdkLogRecord};
use opentelemetry_sdk::Resource;
use task_log_pipeline::configuration::{IterationCount, LogFormat, ProcessorSettings, RunnerSettings};
use task_log_pipeline::observability::{get_subscriber, LogPipeline};
use task_log_pipeline::runner::{RunSummary, TaskRunner};

/// The parts of an exported record the tests look at.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedRecord {
    pub body: Option<String>,
    pub severity: Option<Severity>,
    pub attributes: Vec<(String, AnyValue)>,
}

impl CapturedRecord {
    pub fn from_record(record: &SdkLogRecord) -> Self {
        Self {
            body: record.body().map(text),
            severity: record.severity_number(),
            attributes: record
                .attributes_iter()
                .map(|(key, value)| (key.as_str().to_owned(), value.clone()))
                .collect(),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&AnyValue> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn task_id(&self) -> Option<i64> {
        match self.attribute("task_id") {
            Some(AnyValue::Int(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn body_starts_with(&self, prefix: &str) -> bool {
        self.body.as_deref().is_some_and(|body| body.starts_with(prefix))
    }

    /// Same record without the wall-clock attribute, for comparing runs.
    pub fn without_timestamp(&self) -> Self {
        Self {
            attributes: self
                .attributes
                .iter()
                .filter(|(name, _)| name != "timestamp")
                .cloned()
                .collect(),
            ..self.clone()
        }
    }
}

pub fn text(value: &AnyValue) -> String {
    match value {
        AnyValue::String(s) => s.as_str().to_owned(),
        other => format!("{other:?}"),
    }
}

/// Exporter that records every batch it receives, optionally sleeping first
/// to stand in for a slow collector.
#[derive(Clone, Debug, Default)]
pub struct CaptureExporter {
    records: Arc<Mutex<Vec<CapturedRecord>>>,
    delay: Duration,
}

impl CaptureExporter {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl LogExporter for CaptureExporter {
    fn export(&self, batch: LogBatch<'_>) -> impl Future<Output = OTelSdkResult> + Send {
        std::thread::sleep(self.delay);
        let captured: Vec<_> = batch
            .iter()
            .map(|(record, _)| CapturedRecord::from_record(record))
            .collect();
        self.records.lock().unwrap().extend(captured);
        std::future::ready(Ok(()))
    }
}

pub fn runner_settings(iteration_count: IterationCount) -> RunnerSettings {
    RunnerSettings {
        iteration_count,
        work_delay_ms: 1_000,
        pause_ms: 100,
        processor: "main".into(),
    }
}

/// A batched processor that only exports on shutdown or when `batch_size`
/// records are queued.
pub fn batched(batch_size: usize) -> ProcessorSettings {
    ProcessorSettings {
        scheduled_delay_ms: 60_000,
        max_export_batch_size: batch_size,
        ..ProcessorSettings::default()
    }
}

pub fn pipeline<E>(exporter: E, processor: &ProcessorSettings, grace_period: Duration) -> LogPipeline
where
    E: LogExporter + 'static,
{
    LogPipeline::with_exporter(
        Resource::builder_empty().build(),
        exporter,
        processor,
        grace_period,
    )
}

/// Runs the task loop with the bridge installed as the thread's default
/// subscriber, so nothing outside the test sees its events.
pub async fn run_tasks<F>(
    pipeline: &LogPipeline,
    iteration_count: IterationCount,
    shutdown: F,
) -> RunSummary
where
    F: Future<Output = ()>,
{
    let subscriber = temp_env::with_var_unset("RUST_LOG", || {
        get_subscriber(
            "pipeline-tests".into(),
            "info".into(),
            LogFormat::Disabled,
            std::io::sink,
            pipeline.provider(),
        )
    });
    let _guard = tracing::subscriber::set_default(subscriber);

    TaskRunner::new(&runner_settings(iteration_count))
        .run(shutdown)
        .await
}

pub fn count_with_prefix(records: &[CapturedRecord], prefix: &str) -> usize {
    records
        .iter()
        .filter(|record| record.body_starts_with(prefix))
        .count()
}
