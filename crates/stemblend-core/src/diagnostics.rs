use std::{fs, io, path::Path};

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::DiagnosticsConfig;

pub const DEFAULT_FILTER: &str = "info,stemblend_core=debug";
pub const DEFAULT_FILE_PREFIX: &str = "stemblend";

/// Keeps the file writer flushing; drop it last.
pub struct TelemetryGuard {
    session_id: Uuid,
    log_file: String,
    _file_guard: WorkerGuard,
}

impl TelemetryGuard {
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub fn log_file(&self) -> &str {
        &self.log_file
    }
}

pub fn init_tracing(log_dir: impl AsRef<Path>) -> anyhow::Result<TelemetryGuard> {
    init_tracing_with_options(log_dir, &DiagnosticsConfig::default())
}

/// Shell responses own stdout, so the human-readable layer writes to stderr.
/// `<log_dir>/<prefix>-<timestamp>.log` gets JSON with span context.
/// `RUST_LOG` wins over the configured filter.
pub fn init_tracing_with_options(
    log_dir: impl AsRef<Path>,
    options: &DiagnosticsConfig,
) -> anyhow::Result<TelemetryGuard> {
    let log_dir = log_dir.as_ref();
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let session_id = Uuid::new_v4();
    let log_file = format!(
        "{}-{}.log",
        options.trace_file_prefix,
        Utc::now().format("%Y%m%d-%H%M%S")
    );
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, &log_file));

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.rust_log_filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(io::stderr);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(file_writer);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
    {
        Ok(()) => info!(%session_id, log_file = %log_file, "tracing initialized"),
        Err(error) => warn!(?error, "global tracing subscriber already initialized"),
    }

    Ok(TelemetryGuard {
        session_id,
        log_file,
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_initialisation_is_not_an_error() {
        let temp = tempfile::tempdir().expect("tempdir should be creatable");
        let log_dir = temp.path().join("logs");
        let options = DiagnosticsConfig {
            rust_log_filter: "not a [valid filter".to_string(),
            trace_file_prefix: "blend-test".to_string(),
        };

        let first = init_tracing_with_options(&log_dir, &options).expect("first init should work");
        let second = init_tracing(&log_dir).expect("second init should be tolerated");
        assert!(log_dir.is_dir());
        assert!(first.log_file().starts_with("blend-test-"));
        assert_ne!(first.session_id(), second.session_id());
    }
}
