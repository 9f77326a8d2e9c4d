//! Tracing subscriber setup for hosts embedding waypoint.
//!
//! The library itself only emits `tracing` events. A host that wants them
//! written somewhere calls [`init`] once at startup.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::{fmt as layer_fmt, prelude::*, EnvFilter};

/// Log file location relative to a workspace data directory.
pub const LOG_FILE: &str = "logs/waypoint.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Where and how much to log.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Mirror events to stderr.
    pub stderr: bool,
    /// Append events to this file.
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Log to `<data_dir>/logs/waypoint.log` at `level`.
    pub fn for_workspace(data_dir: &Path, level: LogLevel) -> Self {
        Self {
            level,
            stderr: false,
            file: Some(log_path(data_dir)),
        }
    }
}

/// Path of the log file kept inside a workspace data directory.
pub fn log_path(data_dir: &Path) -> PathBuf {
    data_dir.join(LOG_FILE)
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the configured level. Returns `false` if a global
/// subscriber was already installed or the log file could not be opened;
/// the process keeps running either way.
pub fn init(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let stderr_layer = config
        .stderr
        .then(|| layer_fmt::layer().with_target(true).with_writer(std::io::stderr));

    let file = config.file.as_deref().map(open_append).transpose();
    let file_ok = file.is_ok();
    let file_layer = file.ok().flatten().map(|file| {
        layer_fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    installed && file_ok
}

fn open_append(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}
