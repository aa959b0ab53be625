//! Optional subscriber setup for the `tracing` events this crate emits.
//!
//! The library never installs a subscriber by itself; applications call
//! [`init_logging`] (or install their own) and tests call
//! [`init_test_logging`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable holding an `EnvFilter` directive, e.g. `promising=debug`.
pub const LOG_ENV: &str = "PROMISING_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error or off
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            color: default_true(),
        }
    }
}

/// Install a global subscriber writing to stdout.
///
/// `PROMISING_LOG` wins over the configured level.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<()> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);
    let filter = build_env_filter(config)?;
    let registry = Registry::default().with(filter);

    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stdout),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(config.color)
                    .with_writer(std::io::stdout),
            )
            .try_init(),
    };
    installed.map_err(|e| Error::Logging(format!("Failed to install log subscriber: {}", e)))
}

/// Route events into the test harness output. Safe to call from every test.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = Registry::default()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| Error::Logging(format!("Invalid log level {:?}: {}", config.level, e)))
}
