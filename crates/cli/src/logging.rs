//! Logging setup for the command line

use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the migration CLI
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// Enable JSON structured logging (vs plain text)
    pub json_format: bool,
    /// Include file and line number information
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, json_format: bool) -> Self {
        let level = level.into();
        Self {
            include_location: matches!(level.as_str(), "debug" | "trace"),
            level,
            json_format,
        }
    }

    /// Filter directive used when `RUST_LOG` is not set.
    ///
    /// sqlx logs every statement at info; keep it at warn.
    pub fn directive(&self) -> String {
        format!("{},sqlx=warn", self.level)
    }
}

/// Initialize logging; output goes to stderr so command output stays on stdout
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.directive()))?;

    let layer = Layer::new()
        .with_writer(io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()?;
    }

    tracing::debug!(
        "Logging initialized (level: {}, format: {})",
        config.level,
        if config.json_format { "JSON" } else { "text" }
    );
    Ok(())
}
