//! Logging configuration and initialization.
//!
//! The library only emits `tracing` events. Applications and test harnesses
//! that want them rendered call [`init_logging`] once, usually with
//! [`LogConfig::from_env`].

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Filter directive, e.g. `modelpack=debug`.
pub const LOG_FILTER_ENV: &str = "MODELPACK_LOG";
/// One of `json`, `pretty`, `compact`.
pub const LOG_FORMAT_ENV: &str = "MODELPACK_LOG_FORMAT";
/// Append logs to this file instead of stderr.
pub const LOG_FILE_ENV: &str = "MODELPACK_LOG_FILE";

const DEFAULT_FILTER: &str = "modelpack=info";

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event (default).
    #[default]
    Json,
    /// Multi-line, human-readable.
    Pretty,
    /// Single-line, human-readable.
    Compact,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives.
    pub level: String,
    /// Log file; stderr when `None`.
    pub output_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: DEFAULT_FILTER.to_string(),
            output_path: None,
        }
    }
}

impl LogConfig {
    /// Read [`LOG_FILTER_ENV`], [`LOG_FORMAT_ENV`] and [`LOG_FILE_ENV`].
    /// Unset, empty or unrecognized values keep the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let format = match non_empty(LOG_FORMAT_ENV) {
            Some(raw) => LogFormat::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "unknown {}, using json", LOG_FORMAT_ENV);
                defaults.format
            }),
            None => defaults.format,
        };
        Self {
            format,
            level: non_empty(LOG_FILTER_ENV).unwrap_or(defaults.level),
            output_path: non_empty(LOG_FILE_ENV).map(PathBuf::from),
        }
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
    #[error("Failed to open log file {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Subscriber already initialized")]
    AlreadyInitialized,
}

fn open_log_file(path: &Path) -> Result<File, LogError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LogError::FileOpen {
            path: path.to_path_buf(),
            source,
        })
}

/// Install the global subscriber described by `config`.
///
/// The filter and the log file are validated before anything is installed,
/// so a bad configuration leaves the process without a subscriber.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter =
        EnvFilter::try_new(&config.level).map_err(|e| LogError::InvalidFilter(e.to_string()))?;

    let (writer, ansi) = match &config.output_path {
        Some(path) => (BoxMakeWriter::new(Mutex::new(open_log_file(path)?)), false),
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let layer: BoxedLayer = match config.format {
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)
}
