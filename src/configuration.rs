use std::collections::HashMap;
use std::convert::{TryFrom, TryInto};
use std::path::Path;
use std::time::Duration;

use config::ConfigError;
use opentelemetry::KeyValue;
use opentelemetry_sdk::logs::{BatchConfig, BatchConfigBuilder};
use opentelemetry_sdk::Resource;
use secrecy::SecretString;
use serde_aux::field_attributes::deserialize_number_from_string;

// Still experimental in semantic conventions, and only exported by
// `opentelemetry-semantic-conventions` behind `semconv_experimental`.
const DEPLOYMENT_ENVIRONMENT_NAME: &str = "deployment.environment.name";

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub exporter: ExporterSettings,
    #[serde(default)]
    pub processor: ProcessorSettings,
    pub logging: LoggingSettings,
    pub runner: RunnerSettings,
    pub shutdown: ShutdownSettings,
    #[serde(default)]
    pub env: Environment,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub name: String,
    pub version: String,
    /// Extra attributes merged into the resource next to the service identity.
    #[serde(default)]
    pub resource_attributes: HashMap<String, String>,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ExporterSettings {
    /// `console`, `none`, or the collector endpoint URL.
    pub target: String,
    #[serde(default)]
    pub insecure: bool,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout: u64,
    #[serde(default)]
    pub auth_token: Option<SecretString>,
}

impl ExporterSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorMode {
    /// Records are queued and exported from a background thread.
    Batched,
    /// Each record is exported on the caller's thread before the log call returns.
    Synchronous,
}

#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ProcessorSettings {
    pub mode: ProcessorMode,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub scheduled_delay_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_queue_size: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_export_batch_size: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            mode: ProcessorMode::Batched,
            scheduled_delay_ms: 1_000,
            max_queue_size: 2_048,
            max_export_batch_size: 512,
        }
    }
}

impl ProcessorSettings {
    pub fn synchronous() -> Self {
        Self {
            mode: ProcessorMode::Synchronous,
            ..Self::default()
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfigBuilder::default()
            .with_scheduled_delay(Duration::from_millis(self.scheduled_delay_ms))
            .with_max_queue_size(self.max_queue_size)
            .with_max_export_batch_size(self.max_export_batch_size)
            .build()
    }
}

#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Bunyan,
    Pretty,
    #[serde(rename = "none")]
    Disabled,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct RunnerSettings {
    pub iteration_count: IterationCount,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub work_delay_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub pause_ms: u64,
    pub processor: String,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ShutdownSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub grace_period: u64,
}

impl ShutdownSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period)
    }
}

/// How many tasks the runner issues before it stops on its own.
#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(try_from = "String")]
pub enum IterationCount {
    Finite(u64),
    Infinite,
}

impl IterationCount {
    /// Whether another task may start once `completed` tasks are done.
    pub fn allows(&self, completed: u64) -> bool {
        match self {
            IterationCount::Finite(limit) => completed < *limit,
            IterationCount::Infinite => true,
        }
    }
}

impl TryFrom<String> for IterationCount {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let value = s.trim();
        if value.eq_ignore_ascii_case("infinite") {
            return Ok(Self::Infinite);
        }

        match value.parse::<u64>() {
            Ok(0) => Err("iteration_count must be a positive integer or `infinite`".into()),
            Ok(limit) => Ok(Self::Finite(limit)),
            Err(_) => Err(format!(
                "{} is not a valid iteration_count. Use a positive integer or `infinite`.",
                value
            )),
        }
    }
}

impl Settings {
    pub fn get_resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.application.name.clone())
            .with_attributes([
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.application.version.clone(),
                ),
                KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, self.env.as_str()),
            ])
            .with_attributes(
                self.application
                    .resource_attributes
                    .iter()
                    .map(|(key, value)| KeyValue::new(key.clone(), value.clone())),
            )
            .build()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.application.name.trim().is_empty() {
            return Err(ConfigError::Message(
                "application.name must not be empty".into(),
            ));
        }

        if self
            .application
            .resource_attributes
            .keys()
            .any(|key| key.trim().is_empty())
        {
            return Err(ConfigError::Message(
                "application.resource_attributes keys must not be empty".into(),
            ));
        }

        Ok(())
    }
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| ConfigError::Foreign(Box::new(e)))?;
    let configuration_directory = base_path.join("config");

    // Detect the running environment.
    // Default to `local` if unspecified.
    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;

    get_configuration_from(&configuration_directory, environment)
}

/// Layers `base.yaml`, `<environment>.yaml` and `APP_` variables found in the
/// environment, e.g. `APP_RUNNER__ITERATION_COUNT=infinite`.
pub fn get_configuration_from(
    configuration_directory: &Path,
    environment: Environment,
) -> Result<Settings, ConfigError> {
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(configuration_directory.join(environment_filename))
                .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let mut settings_parsed = settings.try_deserialize::<Settings>()?;

    settings_parsed.env = environment;
    settings_parsed.validate()?;

    Ok(settings_parsed)
}

/// The possible runtime environment for our application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}
