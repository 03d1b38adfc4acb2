//! Log initialisation using `tracing` and `tracing-subscriber`.
//!
//! # Log Levels
//!
//! - `error`: auth subscription failures (navigation stuck on splash)
//! - `warn`: profile fetch failures that fell back to the lowest privilege
//! - `info`: lifecycle and sign-in transitions
//! - `debug`: screen changes, discarded stale profile results

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output
    #[default]
    Pretty,
    /// Single-line output
    Compact,
    /// JSON, one object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    /// Level for the EZTeach crates (`error` through `trace`)
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Include the module path of each event
    pub with_target: bool,
    /// Use ANSI colours (ignored for JSON)
    pub with_ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            with_target: false,
            with_ansi: true,
        }
    }
}

impl LogConfig {
    /// Set the level
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Set the output format
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Filter directives for this configuration
    ///
    /// Dependencies stay at `warn`.
    pub fn directives(&self) -> String {
        let level = self.level.to_ascii_lowercase();
        format!("warn,ezteach={level},app_state={level},backend_client={level}")
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured level when set.
///
/// # Errors
///
/// Returns an error if the level is not a valid filter or a global
/// subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = build_env_filter(config)?;

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(config.with_target))
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(config.with_ansi)
                    .with_target(config.with_target),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(config.with_ansi)
                    .with_target(config.with_target),
            )
            .try_init(),
    }
    .context("failed to install tracing subscriber")?;

    tracing::debug!(level = %config.level, format = ?config.format, "logging initialised");
    Ok(())
}

fn build_env_filter(config: &LogConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(config.directives())
        .with_context(|| format!("invalid log level {:?}", config.level))
}
