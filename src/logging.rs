//! Subscriber setup for the `tracing` events emitted by the engine.
//!
//! The library only emits events; binaries and tests decide where they go.
//! Output goes to stderr so that command output on stdout stays clean.
//!
//! `RUST_LOG` takes precedence over the configured level when set.
//!
//! # Example
//! ```no_run
//! use daft::{config::DaftConfig, logging};
//!
//! let config = DaftConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!("ready");
//! # Ok::<(), daft::DaftError>(())
//! ```

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::DaftConfig;
use crate::error::{DaftError, DaftResult};

/// Event output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, colored (for development)
    Pretty,
    /// Single-line, no colors
    Compact,
    /// One JSON object per event (for log aggregation)
    Json,
}

impl FromStr for LogFormat {
    type Err = DaftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(DaftError::Config(format!(
                "Invalid log format '{s}'. Must be one of: pretty, compact, json"
            ))),
        }
    }
}

/// Subscriber options.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub level: Level,
    pub format: LogFormat,
    /// Emit span open/close events (`daft_compute`, `daft_write`).
    pub with_span_events: bool,
    pub with_thread_names: bool,
    /// Colors, Pretty format only.
    pub with_ansi: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            with_span_events: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl LoggingOptions {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn from_config(config: &DaftConfig) -> DaftResult<Self> {
        Ok(Self {
            level: parse_level(&config.logging.level)?,
            format: config.logging.format.parse()?,
            ..Default::default()
        })
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install the global subscriber described by the `logging` config section.
pub fn init_from_config(config: &DaftConfig) -> DaftResult<()> {
    init(LoggingOptions::from_config(config)?)
}

/// Install the global subscriber.
///
/// Idempotent: if a subscriber is already installed this returns `Ok(())`.
pub fn init(options: LoggingOptions) -> DaftResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.level.as_str().to_lowercase()));
    let span_events = if options.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match options.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_span_events(span_events)
            .with_thread_names(options.with_thread_names)
            .with_ansi(options.with_ansi)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_span_events(span_events)
            .with_thread_names(options.with_thread_names)
            .with_ansi(false)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(span_events)
            .with_thread_names(options.with_thread_names)
            .with_filter(filter)
            .boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        // Already initialized: expected in tests and embedding applications.
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(DaftError::Config(format!(
            "Failed to initialize tracing: {e}"
        ))),
    }
}

fn parse_level(level: &str) -> DaftResult<Level> {
    Level::from_str(level).map_err(|_| {
        DaftError::Config(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_level("WARN").unwrap(), Level::WARN);
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_options_from_config() {
        let mut config = DaftConfig::default();
        config.logging.level = "debug".into();
        config.logging.format = "json".into();

        let options = LoggingOptions::from_config(&config).unwrap();
        assert_eq!(options.level, Level::DEBUG);
        assert_eq!(options.format, LogFormat::Json);
    }

    #[test]
    fn test_init_is_idempotent() {
        let options = LoggingOptions::new(Level::WARN).with_format(LogFormat::Compact);
        assert!(init(options.clone()).is_ok());
        assert!(init(options).is_ok());
    }
}
