//! Configuration schema definitions.
//!
//! ```toml
//! [logging]
//! level = "info"
//! format = "compact"
//! output = "stdout"
//!
//! [logging.filters]
//! onebridge_transport = "debug"
//!
//! [onebot]
//! mode = "client"
//! api_timeout_secs = 30
//!
//! [onebot.client]
//! url = "ws://127.0.0.1:3001"
//! token = "s3cret"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use onebridge_adapter_onebot::OneBotConfig;
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Logging settings.
    pub logging: LoggingConfig,

    /// OneBot adapter settings.
    pub onebot: OneBotConfig,
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive spelling of this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// The matching `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level, used when `RUST_LOG` is unset.
    pub level: LogLevel,

    pub format: LogFormat,

    pub output: LogOutput,

    /// Log file, used when `output` is `file`.
    pub file_path: Option<PathBuf>,

    pub rotation: LogRotation,

    pub span_events: SpanEventConfig,

    /// Include thread ids in each line.
    pub thread_ids: bool,

    /// Include file and line of each event.
    pub file_location: bool,

    /// Per-module levels, e.g. `onebridge_transport = "debug"`.
    pub filters: BTreeMap<String, String>,
}
