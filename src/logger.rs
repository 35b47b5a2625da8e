//! Global `tracing` subscriber setup.
//!
//! `LoggerManager` validates the `[logger]` section and installs a registry
//! with a console layer, a journald layer, or both. Each layer gets its own
//! `EnvFilter`: `RUST_LOG` when set, the configured level otherwise.

use std::io;

use thiserror::Error;
use tracing_subscriber::{fmt, fmt::format::FmtSpan, prelude::*, EnvFilter, Layer, Registry};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, JournaldConfig, LogFormat, LoggerConfig},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Logger configuration validation error: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    /// The journald socket is unavailable.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,

    #[error("Failed to install the global subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Installs the global subscriber. Call once, before the first event.
    ///
    /// A journald failure is tolerated while the console layer is active.
    pub fn init(&self) -> Result<(), LoggerError> {
        let layers = self.layers()?;
        tracing_subscriber::registry().with(layers).try_init()?;
        Ok(())
    }

    fn layers(&self) -> Result<Vec<BoxedLayer>, LoggerError> {
        let mut layers = Vec::new();

        if self.config.console.enabled {
            layers.push(console_layer(&self.config.console, self.filter()?));
        }

        if self.config.journald.enabled {
            match journald_layer(&self.config.journald, self.filter()?) {
                Ok(layer) => {
                    layers.push(layer);
                    print_info!(
                        "Journald logging enabled with identifier: {}",
                        self.config.journald.identifier
                    );
                }
                Err(e) if self.config.console.enabled => {
                    print_warn!("Journald unavailable, logging to console only: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        if layers.is_empty() {
            return Err(LoggerError::NoLayersConfigured);
        }
        Ok(layers)
    }

    fn filter(&self) -> Result<EnvFilter, LoggerError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => Ok(EnvFilter::try_new(&self.config.level)?),
        }
    }
}

fn console_layer(config: &ConsoleConfig, filter: EnvFilter) -> BoxedLayer {
    let spans = if config.show_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let base = fmt::layer()
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids)
        .with_span_events(spans)
        .with_writer(io::stdout);

    match config.format {
        LogFormat::Json => base.json().with_ansi(false).with_filter(filter).boxed(),
        LogFormat::Pretty => base
            .pretty()
            .with_ansi(config.ansi_colors)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => base
            .compact()
            .with_ansi(config.ansi_colors)
            .with_filter(filter)
            .boxed(),
    }
}

fn journald_layer(config: &JournaldConfig, filter: EnvFilter) -> Result<BoxedLayer, LoggerError> {
    let layer = tracing_journald::layer()?.with_syslog_identifier(config.identifier.clone());
    Ok(layer.with_filter(filter).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_config() {
        let config = LoggerConfig {
            level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(
            LoggerManager::new(config),
            Err(LoggerError::Validation(_))
        ));
    }

    #[test]
    fn test_console_layer_built() {
        let manager = LoggerManager::new(LoggerConfig::default()).unwrap();
        assert_eq!(manager.layers().unwrap().len(), 1);
    }

    #[test]
    fn test_every_console_format_builds() {
        for format in [LogFormat::Compact, LogFormat::Pretty, LogFormat::Json] {
            let mut config = LoggerConfig::default();
            config.console.format = format;
            let manager = LoggerManager::new(config).unwrap();
            assert!(manager.layers().is_ok());
        }
    }

    #[test]
    fn test_no_layers() {
        let mut config = LoggerConfig::default();
        config.console.enabled = false;
        let manager = LoggerManager::new(config).unwrap();
        assert!(matches!(
            manager.layers(),
            Err(LoggerError::NoLayersConfigured)
        ));
    }
}
