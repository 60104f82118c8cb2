//! Tracing setup for the sidechain services: compact stdout output filtered
//! by `RUST_LOG`, plus span export to an OTLP collector when one is
//! configured.

use std::env;

use drivechain_config::LoggingConfig;
use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use thiserror::Error;
use tracing::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const OTLP_URL_ENVVAR: &str = "DRIVECHAIN_OTLP_URL";
pub const SVC_LABEL_ENVVAR: &str = "DRIVECHAIN_SVC_LABEL";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("otlp exporter: {0}")]
    Otlp(#[from] opentelemetry::trace::TraceError),

    #[error("subscriber already set: {0}")]
    AlreadyInit(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Reported as the OTLP `service.name`.
    service: String,
    filter: String,
    otlp_url: Option<String>,
}

impl LoggerConfig {
    /// Logger for `service` using the settings from the config file.  The
    /// service label and OTLP url envvars override what's in the file.
    pub fn new(service: &str, config: &LoggingConfig) -> Self {
        let label = env::var(SVC_LABEL_ENVVAR).ok();
        let otlp_url = env::var(OTLP_URL_ENVVAR)
            .ok()
            .or_else(|| config.otlp_url.clone());
        Self {
            service: service_name(service, label.as_deref()),
            filter: config.filter.clone(),
            otlp_url,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn otlp_url(&self) -> Option<&str> {
        self.otlp_url.as_deref()
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        match EnvFilter::try_from_default_env() {
            Ok(filt) => Ok(filt),
            Err(_) => Ok(EnvFilter::try_new(&self.filter)?),
        }
    }
}

/// Installs the global subscriber.
///
/// With an OTLP url set this has to run inside a tokio runtime context, the
/// batch exporter spawns onto it.
pub fn init(config: &LoggerConfig) -> Result<(), LoggingError> {
    let stdout_sub = tracing_subscriber::fmt::layer()
        .compact()
        .with_filter(config.env_filter()?);

    let Some(url) = config.otlp_url() else {
        tracing_subscriber::registry().with(stdout_sub).try_init()?;
        info!(service = %config.service, "logging started");
        return Ok(());
    };

    let resource = Resource::new([KeyValue::new("service.name", config.service.clone())]);
    let provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(url),
        )
        .with_trace_config(sdktrace::Config::default().with_resource(resource))
        .install_batch(runtime::Tokio)?;
    let tracer = provider.tracer(config.service.clone());
    opentelemetry::global::set_tracer_provider(provider);

    tracing_subscriber::registry()
        .with(stdout_sub)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()?;
    info!(service = %config.service, %url, "logging started with OTLP export");
    Ok(())
}

/// Flushes spans still buffered for the OTLP exporter.
pub fn finalize() {
    debug!("shutting down logging");
    opentelemetry::global::shutdown_tracer_provider();
}

fn service_name(base: &str, label: Option<&str>) -> String {
    match label {
        Some(label) => format!("{base}%{label}"),
        None => base.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name() {
        assert_eq!(service_name("scdb-tool", None), "scdb-tool");
        assert_eq!(service_name("scdb-tool", Some("a")), "scdb-tool%a");
    }

    #[test]
    fn test_bad_filter_rejected() {
        let config = LoggerConfig {
            service: "x".to_owned(),
            filter: "info,[[".to_owned(),
            otlp_url: None,
        };
        if env::var(EnvFilter::DEFAULT_ENV).is_err() {
            assert!(matches!(config.env_filter(), Err(LoggingError::Filter(_))));
        }
    }
}
