//! Logging configuration and initialization
//!
//! Standard output carries converted records, so console logging defaults to
//! standard error. Supported targets:
//!
//! - stderr (default) or stdout
//! - daily rotating log files
//! - both console and file
//!
//! Formats are plain text or JSON. Everything can be driven from the
//! environment through [`LogConfig::from_env`].
//!
//! # Example
//!
//! ```no_run
//! use marcstream_common::logging::{init_logging, LogConfig};
//! use tracing::info;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!
//!     info!("conversion started");
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    /// Only warnings and errors; the default for a conversion run
    #[default]
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow::anyhow!("Invalid log level: {}", s)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// Output target for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stderr,
    Stdout,
    File,
    /// Standard error plus the rolling file
    Both,
}

impl std::str::FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stderr" | "console" => Ok(LogOutput::Stderr),
            "stdout" => Ok(LogOutput::Stdout),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(anyhow::anyhow!("Invalid log output: {}", s)),
        }
    }
}

impl std::fmt::Display for LogOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogOutput::Stderr => "stderr",
            LogOutput::Stdout => "stdout",
            LogOutput::File => "file",
            LogOutput::Both => "both",
        };
        f.write_str(name)
    }
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,

    /// Directory for log files (only used when output includes file)
    pub log_dir: PathBuf,

    /// Log file name prefix, e.g. "marcstream" -> "marcstream.2024-01-18"
    pub log_file_prefix: String,

    /// Additional filter directives such as "aws_smithy_runtime=warn,hyper=info"
    pub filter_directives: Option<String>,

    pub include_location: bool,
    pub include_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            output: LogOutput::Stderr,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "marcstream".to_string(),
            filter_directives: None,
            include_location: false,
            include_targets: true,
        }
    }
}

impl LogConfig {
    /// Defaults overridden by the environment
    ///
    /// - `LOG_LEVEL`: trace, debug, info, warn, error
    /// - `LOG_OUTPUT`: stderr, stdout, file, both
    /// - `LOG_FORMAT`: text, json
    /// - `LOG_DIR`, `LOG_FILE_PREFIX`, `LOG_FILTER`
    /// - `LOG_INCLUDE_LOCATION`, `LOG_INCLUDE_TARGETS`: true/false
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let defaults = Self::default();

        Ok(Self {
            level: var("LOG_LEVEL").map(|v| v.parse()).transpose()?.unwrap_or(defaults.level),
            output: var("LOG_OUTPUT").map(|v| v.parse()).transpose()?.unwrap_or(defaults.output),
            format: var("LOG_FORMAT").map(|v| v.parse()).transpose()?.unwrap_or(defaults.format),
            log_dir: var("LOG_DIR").map(PathBuf::from).unwrap_or(defaults.log_dir),
            log_file_prefix: var("LOG_FILE_PREFIX").unwrap_or(defaults.log_file_prefix),
            filter_directives: var("LOG_FILTER"),
            include_location: var("LOG_INCLUDE_LOCATION")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.include_location),
            include_targets: var("LOG_INCLUDE_TARGETS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.include_targets),
        })
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn layer_for(config: &LogConfig, writer: BoxMakeWriter, ansi: bool) -> BoxedLayer {
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(config.include_targets)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    match config.format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Initialize the global tracing subscriber
///
/// Call once at startup. The returned guard flushes the file writer when
/// dropped and must be held until the program exits.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(Level::from(config.level)).into())
        .from_env_lossy();

    if let Some(ref directives) = config.filter_directives {
        for directive in directives.split(',').filter(|d| !d.trim().is_empty()) {
            filter = filter.add_directive(
                directive
                    .trim()
                    .parse()
                    .context("Failed to parse filter directive")?,
            );
        }
    }

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    match config.output {
        LogOutput::Stderr | LogOutput::Both => {
            layers.push(layer_for(config, BoxMakeWriter::new(std::io::stderr), true));
        },
        LogOutput::Stdout => {
            layers.push(layer_for(config, BoxMakeWriter::new(std::io::stdout), true));
        },
        LogOutput::File => {},
    }

    if matches!(config.output, LogOutput::File | LogOutput::Both) {
        std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        let (non_blocking, worker) = tracing_appender::non_blocking(appender);
        layers.push(layer_for(config, BoxMakeWriter::new(non_blocking), false));
        guard = Some(worker);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_output_from_str() {
        assert_eq!("console".parse::<LogOutput>().unwrap(), LogOutput::Stderr);
        assert_eq!("stdout".parse::<LogOutput>().unwrap(), LogOutput::Stdout);
        assert_eq!("both".parse::<LogOutput>().unwrap(), LogOutput::Both);
        assert!("syslog".parse::<LogOutput>().is_err());
    }

    #[test]
    fn test_defaults_keep_stdout_free() {
        let config = LogConfig::default();
        assert_eq!(config.output, LogOutput::Stderr);
        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.output.to_string(), "stderr");
    }

    #[test]
    #[serial]
    fn test_from_env_overrides_defaults() {
        std::env::set_var("LOG_LEVEL", "debug");
        std::env::set_var("LOG_OUTPUT", "file");
        std::env::set_var("LOG_FORMAT", "json");
        std::env::set_var("LOG_FILE_PREFIX", "convert");
        std::env::set_var("LOG_INCLUDE_TARGETS", "nonsense");
        let config = LogConfig::from_env().unwrap();
        for name in [
            "LOG_LEVEL",
            "LOG_OUTPUT",
            "LOG_FORMAT",
            "LOG_FILE_PREFIX",
            "LOG_INCLUDE_TARGETS",
        ] {
            std::env::remove_var(name);
        }

        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.output, LogOutput::File);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_file_prefix, "convert");
        assert_eq!(config.log_dir, PathBuf::from("./logs"));
        assert!(config.include_targets);
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_output() {
        std::env::set_var("LOG_OUTPUT", "syslog");
        let result = LogConfig::from_env();
        std::env::remove_var("LOG_OUTPUT");
        assert!(result.is_err());
    }
}
