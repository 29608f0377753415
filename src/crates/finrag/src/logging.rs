//! Logging initialization from the `[logging]` section.
//!
//! - `RUST_LOG` wins over `level` when set, e.g. `finrag=debug,finrag_graph=trace`.
//! - `format` picks compact, pretty or JSON lines.
//! - With `file` set, logs are appended there without ANSI colors; otherwise
//!   they go to stderr so stdout stays clean for answers.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{FinragError, Result};

/// Install the global subscriber
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;

    let layer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            fmt_layer(config.format, Mutex::new(file), false)
        }
        None => fmt_layer(config.format, std::io::stderr, true),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| FinragError::Config(format!("logging already initialized: {e}")))?;

    if let Some(path) = &config.file {
        tracing::info!(path = %path.display(), "logging to file");
    }
    Ok(())
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| FinragError::Config(format!("invalid log level '{}': {e}", config.level))),
    }
}

fn fmt_layer<S, W>(format: LogFormat, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true);
    match format {
        LogFormat::Compact => base.compact().boxed(),
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Json => base.json().boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_level_is_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "finrag=verbose".to_string(),
            ..Default::default()
        };
        assert!(build_filter(&config).is_err());
    }

    #[test]
    fn test_level_directives_parse() {
        let config = LoggingConfig {
            level: "info,finrag_graph=debug".to_string(),
            ..Default::default()
        };
        assert!(build_filter(&config).is_ok());
    }
}
