//! Logging setup for the operator
//!
//! Features:
//! - Text or JSON structured output
//! - Level from configuration, overridable through `RUST_LOG`

use crate::config::LoggingSection;
use crate::error::{OperatorError, Result};
use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// Log format type
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LogFormat {
    /// Plain text format (default)
    #[default]
    Text,
    /// JSON structured format
    Json,
}

impl LogFormat {
    /// Parse log format from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Log configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Log format (text or json)
    pub format: LogFormat,
    /// Include the event target (module path) in every line
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            with_target: false,
        }
    }
}

impl LogConfig {
    /// Parse log level from string
    pub fn parse_level(s: &str) -> Option<Level> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Level::TRACE),
            "debug" => Some(Level::DEBUG),
            "info" => Some(Level::INFO),
            "warn" | "warning" => Some(Level::WARN),
            "error" => Some(Level::ERROR),
            _ => None,
        }
    }

    /// Build from the `[logging]` section of the operator configuration.
    pub fn from_section(section: &LoggingSection) -> Result<Self> {
        let level = Self::parse_level(&section.level).ok_or_else(|| {
            OperatorError::Config(format!("invalid log level '{}'", section.level))
        })?;
        let format = LogFormat::parse(&section.format).ok_or_else(|| {
            OperatorError::Config(format!("invalid log format '{}'", section.format))
        })?;
        Ok(Self {
            level,
            format,
            ..Default::default()
        })
    }
}

/// Install the global tracing subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_target(config.with_target)
        .with_level(true)
        .with_env_filter(filter);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| OperatorError::Internal(format!("failed to install logger: {}", e)))
}
