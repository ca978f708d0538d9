//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global subscriber from config and environment
//! - Build standalone dispatchers so a controller can log to its own sink
//! - Map the configured log level onto `tracing` levels
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, text format for development
//! - `RUST_LOG` overrides the configured level for the global subscriber
//! - `Fatal` maps to `ERROR` and terminates the process after logging

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing::{Dispatch, Level};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Log verbosity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Fatal,
    Error,
    #[serde(alias = "warning")]
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Error)]
#[error("not a valid log level: {0}")]
pub struct ParseLevelError(String);

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Fatal => "FATAL",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// The `tracing` level events at this level are emitted with.
    pub fn as_tracing(self) -> Level {
        match self {
            LogLevel::Fatal | LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    pub fn as_filter(self) -> LevelFilter {
        LevelFilter::from_level(self.as_tracing())
    }

    /// Directive accepted by `EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Fatal | LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Whether an event at this level would be recorded by the current
    /// subscriber. Lets callers skip expensive formatting.
    pub fn enabled(self) -> bool {
        match self {
            LogLevel::Fatal | LogLevel::Error => tracing::enabled!(Level::ERROR),
            LogLevel::Warn => tracing::enabled!(Level::WARN),
            LogLevel::Info => tracing::enabled!(Level::INFO),
            LogLevel::Debug => tracing::enabled!(Level::DEBUG),
            LogLevel::Trace => tracing::enabled!(Level::TRACE),
        }
    }

    /// Emit a preformatted message at this level.
    ///
    /// `Fatal` is logged at `ERROR`; it does not exit. Use [`fatal`] for that.
    pub fn log(self, args: fmt::Arguments<'_>) {
        match self {
            LogLevel::Fatal => tracing::error!(fatal = true, "{}", args),
            LogLevel::Error => tracing::error!("{}", args),
            LogLevel::Warn => tracing::warn!("{}", args),
            LogLevel::Info => tracing::info!("{}", args),
            LogLevel::Debug => tracing::debug!("{}", args),
            LogLevel::Trace => tracing::trace!("{}", args),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fatal" => Ok(LogLevel::Fatal),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Log a message and terminate the process with status 1.
pub fn fatal(args: fmt::Arguments<'_>) -> ! {
    LogLevel::Fatal.log(args);
    std::process::exit(1)
}

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

/// Install the global subscriber writing to stdout.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));

    let (text, json) = match config.format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
}

/// Build a dispatcher writing to `writer`, independent of the global one.
pub fn build_dispatch<W>(config: &LoggingConfig, writer: W) -> Dispatch
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::registry().with(config.level.as_filter());

    match config.format {
        LogFormat::Text => Dispatch::new(
            subscriber.with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer),
            ),
        ),
        LogFormat::Json => Dispatch::new(
            subscriber.with(tracing_subscriber::fmt::layer().json().with_writer(writer)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Buffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Buffer {
        type Writer = Buffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Debug.to_string(), "DEBUG");
    }

    #[test]
    fn levels_order_by_severity() {
        assert!(LogLevel::Fatal < LogLevel::Error);
        assert!(LogLevel::Debug < LogLevel::Trace);
        assert_eq!(LogLevel::Fatal.as_filter(), LevelFilter::ERROR);
    }

    #[test]
    fn deserializes_warning_alias() {
        let config: LoggingConfig = toml::from_str("level = \"warning\"\nformat = \"json\"").unwrap();
        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn dispatch_respects_level_and_writer() {
        let buffer = Buffer::default();
        let config = LoggingConfig {
            level: LogLevel::Info,
            format: LogFormat::Text,
        };
        let dispatch = build_dispatch(&config, buffer.clone());

        tracing::dispatcher::with_default(&dispatch, || {
            assert!(LogLevel::Info.enabled());
            assert!(!LogLevel::Debug.enabled());
            LogLevel::Warn.log(format_args!("disk {} full", "/var"));
            LogLevel::Debug.log(format_args!("hidden"));
        });

        let out = buffer.contents();
        assert!(out.contains("disk /var full"));
        assert!(!out.contains("hidden"));
    }

    #[test]
    fn json_dispatch_writes_json_lines() {
        let buffer = Buffer::default();
        let config = LoggingConfig {
            level: LogLevel::Trace,
            format: LogFormat::Json,
        };
        let dispatch = build_dispatch(&config, buffer.clone());

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!(attempt = 1, "Server is restarting");
        });

        let line = buffer.contents();
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["fields"]["message"], "Server is restarting");
    }
}
