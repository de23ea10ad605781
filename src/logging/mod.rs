//! Logging configuration and initialization
//!
//! The library itself only emits `tracing` events: a `debug` event per
//! pipeline state transition, a `trace` event per head stage and an
//! `info` span around every invocation. Binaries, benches and tests opt into
//! output with one of the `init_*` functions below.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard tracing filter (e.g., "info", "debug,mhaforge=trace")
//! - `MHAFORGE_LOG_LEVEL`: Simple log level (error, warn, info, debug, trace)
//! - `MHAFORGE_LOG_FORMAT`: Output format ("human" or "json")
//! - `MHAFORGE_LOG_FILE`: Optional file path for an additional JSON sink

use std::path::{Path, PathBuf};
use std::str::FromStr;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Set once the global subscriber has been installed (or install was attempted)
static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

const LOG_LEVEL_ENV: &str = "MHAFORGE_LOG_LEVEL";
const LOG_FORMAT_ENV: &str = "MHAFORGE_LOG_FORMAT";
const LOG_FILE_ENV: &str = "MHAFORGE_LOG_FILE";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}")]
    InvalidLogFormat(String),

    #[error("failed to create log directory: {0}")]
    DirectoryCreationFailed(String),

    #[error("failed to open log file: {0}")]
    FileOpenFailed(String),

    /// Another global subscriber was installed first
    #[error("failed to install subscriber: {0}")]
    SubscriberInit(String),
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }

    /// Directive understood by [`EnvFilter`]
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(LoggingError::InvalidLogLevel(other.to_string())),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable colored output
    #[default]
    Human,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" | "console" => Ok(LogFormat::Human),
            "json" | "structured" => Ok(LogFormat::Json),
            other => Err(LoggingError::InvalidLogFormat(other.to_string())),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Include file/line in console events
    pub with_file_info: bool,
    /// Emit an event when a span (e.g. one `mha_forward` invocation) closes
    pub with_span_events: bool,
    /// Additional JSON sink
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `MHAFORGE_LOG_LEVEL`, `MHAFORGE_LOG_FORMAT` and `MHAFORGE_LOG_FILE`
    ///
    /// Unset variables keep their defaults; unparsable ones are an error.
    pub fn from_env() -> Result<Self, LoggingError> {
        let mut config = LoggingConfig::new();
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            config.level = level.parse()?;
        }
        if let Ok(format) = std::env::var(LOG_FORMAT_ENV) {
            config.format = format.parse()?;
        }
        if let Ok(file) = std::env::var(LOG_FILE_ENV) {
            config.log_file = Some(PathBuf::from(file));
        }
        Ok(config)
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_info(mut self, with_file_info: bool) -> Self {
        self.with_file_info = with_file_info;
        self
    }

    pub fn with_span_events(mut self, with_span_events: bool) -> Self {
        self.with_span_events = with_span_events;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Initialize from the environment, silently keeping defaults on bad values
///
/// Idempotent: only the first call installs a subscriber.
///
/// ```ignore
/// mhaforge::init_logging_default();
/// let out = layer.forward(&x, &x, &weights)?;
/// ```
pub fn init_logging_default() {
    if init_logging_from_env().is_err() {
        init_with_config(&LoggingConfig::new());
    }
}

/// Initialize from the environment
///
/// `RUST_LOG` takes precedence over `MHAFORGE_LOG_LEVEL`. Idempotent.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let config = LoggingConfig::from_env()?;
    init_with_config(&config);
    Ok(())
}

/// Initialize with an explicit configuration. Idempotent.
pub fn init_with_config(config: &LoggingConfig) {
    TRACING_INITIALIZED.get_or_init(|| {
        // A subscriber installed by the host application wins
        if let Err(err) = try_init(config) {
            eprintln!("mhaforge: logging not initialized: {}", err);
        }
    });
}

/// Check if initialization has run
pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.get().is_some()
}

fn try_init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_env_filter(config.level)?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![console_layer(config)];
    if let Some(path) = &config.log_file {
        layers.push(file_layer(path, config.with_span_events)?);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| LoggingError::SubscriberInit(e.to_string()))
}

fn span_events(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

fn console_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_file(config.with_file_info)
            .with_line_number(config.with_file_info)
            .with_span_events(span_events(config.with_span_events))
            .boxed(),
        LogFormat::Human => fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_file(config.with_file_info)
            .with_line_number(config.with_file_info)
            .with_span_events(span_events(config.with_span_events))
            .boxed(),
    }
}

/// JSON sink appended to `path`, creating parent directories
fn file_layer(
    path: &Path,
    with_span_events: bool,
) -> Result<Box<dyn Layer<Registry> + Send + Sync>, LoggingError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| LoggingError::DirectoryCreationFailed(e.to_string()))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LoggingError::FileOpenFailed(e.to_string()))?;

    Ok(fmt::layer()
        .json()
        .with_writer(file)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true)
        .with_ansi(false)
        .with_span_events(span_events(with_span_events))
        .boxed())
}

/// `RUST_LOG` first, then the configured level
fn build_env_filter(level: LogLevel) -> Result<EnvFilter, LoggingError> {
    match std::env::var("RUST_LOG") {
        Ok(rust_log) => {
            EnvFilter::try_new(rust_log).map_err(|e| LoggingError::InvalidLogLevel(e.to_string()))
        }
        Err(_) => Ok(EnvFilter::new(level.as_filter_str())),
    }
}
