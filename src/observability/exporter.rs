use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use secrecy::ExposeSecret;
use tonic::metadata::MetadataMap;
use tonic::transport::ClientTlsConfig;
use url::Url;

use crate::configuration::ExporterSettings;

use super::logging::PipelineError;

/// Default OTLP/gRPC collector port.
pub const OTLP_GRPC_PORT: u16 = 4317;

/// Where exported log records end up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExporterTarget {
    /// Human readable records on stdout.
    Console,
    /// No exporter; records are discarded by the provider.
    Disabled,
    /// An OTLP collector reached over gRPC.
    Otlp { endpoint: Url, insecure: bool },
}

impl ExporterTarget {
    pub fn parse(target: &str, insecure: bool) -> Result<Self, PipelineError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(PipelineError::ConnectionConfig(
                "exporter target must not be empty".into(),
            ));
        }

        if target.eq_ignore_ascii_case("console") {
            return Ok(Self::Console);
        }

        if target.eq_ignore_ascii_case("none") {
            return Ok(Self::Disabled);
        }

        let mut endpoint = Url::parse(target).map_err(|e| {
            PipelineError::ConnectionConfig(format!("{target} is not a valid endpoint: {e}"))
        })?;

        match (endpoint.scheme(), insecure) {
            ("http", true) | ("https", false) => {}
            ("http", false) => {
                return Err(PipelineError::ConnectionConfig(format!(
                    "{target} is a plaintext endpoint, set `insecure` to use it"
                )))
            }
            ("https", true) => {
                return Err(PipelineError::ConnectionConfig(format!(
                    "{target} requires TLS but `insecure` is set"
                )))
            }
            (scheme, _) => {
                return Err(PipelineError::ConnectionConfig(format!(
                    "unsupported endpoint scheme `{scheme}`, use http or https"
                )))
            }
        }

        if endpoint.host_str().map_or(true, str::is_empty) {
            return Err(PipelineError::ConnectionConfig(format!(
                "{target} has no host"
            )));
        }

        // `Url` forgets a port equal to the scheme default, so look at the raw text.
        if endpoint.port().is_none() && !has_explicit_port(target) {
            endpoint.set_port(Some(OTLP_GRPC_PORT)).map_err(|_| {
                PipelineError::ConnectionConfig(format!("{target} cannot carry a port"))
            })?;
        }

        Ok(Self::Otlp { endpoint, insecure })
    }
}

/// Whether the authority of `target` ends in `:<digits>`.
fn has_explicit_port(target: &str) -> bool {
    let rest = target.split_once("://").map_or(target, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    // Skip over an IPv6 literal so its colons are not taken for a port.
    let after_host = host_port.rsplit_once(']').map_or(host_port, |(_, tail)| tail);

    after_host.rsplit_once(':').is_some_and(|(_, port)| {
        !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
    })
}

/// Builds the gRPC exporter. Connecting is lazy, so an unreachable collector
/// only shows up as export failures inside the processor.
///
/// Must be called from within a tokio runtime.
pub fn otlp_exporter(
    endpoint: &Url,
    insecure: bool,
    settings: &ExporterSettings,
) -> Result<opentelemetry_otlp::LogExporter, PipelineError> {
    let mut builder = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.as_str())
        .with_timeout(settings.timeout());

    if let Some(token) = &settings.auth_token {
        let value = format!("Bearer {}", token.expose_secret())
            .parse()
            .map_err(|_| {
                PipelineError::ConnectionConfig(
                    "auth token is not a valid metadata value".into(),
                )
            })?;
        let mut metadata = MetadataMap::new();
        metadata.insert("authorization", value);
        builder = builder.with_metadata(metadata);
    }

    if !insecure {
        builder = builder.with_tls_config(ClientTlsConfig::new().with_native_roots());
    }

    Ok(builder.build()?)
}
