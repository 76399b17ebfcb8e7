//! Logging setup for the crosspost binary
//!
//! Provides consistent logging setup with support for:
//! - Text, JSON, and pretty-printed output
//! - Environment variable configuration
//! - Per-module log level filtering
//!
//! # Examples
//!
//! ```no_run
//! use libcrosspost::logging::{LoggingConfig, LogFormat};
//!
//! // Initialize with JSON format
//! let config = LoggingConfig::new(LogFormat::Json, "info".to_string(), false);
//! config.init();
//!
//! // Or use default settings (respects env vars)
//! libcrosspost::logging::init_default();
//! ```

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text output (no colors, for piping)
    Text,
    /// Machine-parseable JSON (one JSON object per line)
    Json,
    /// Pretty-printed with colors (for development)
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

/// Environment variable selecting the log format
pub const LOG_FORMAT_ENV_VAR: &str = "CROSSPOST_LOG_FORMAT";

/// Environment variable selecting the minimum log level
pub const LOG_LEVEL_ENV_VAR: &str = "CROSSPOST_LOG_LEVEL";

/// Level used when neither `RUST_LOG` nor `CROSSPOST_LOG_LEVEL` is set
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Configuration for logging initialization
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    /// Create a new logging configuration
    ///
    /// # Arguments
    ///
    /// * `format` - Log output format (text, json, or pretty)
    /// * `level` - Minimum log level (error, warn, info, debug, trace)
    /// * `verbose` - If true, defaults to debug level
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Build a configuration from the environment
    ///
    /// An explicit `format` (from the command line) wins over
    /// `CROSSPOST_LOG_FORMAT`.
    pub fn from_env(format: Option<LogFormat>, verbose: bool) -> Self {
        let format = format
            .or_else(|| {
                std::env::var(LOG_FORMAT_ENV_VAR)
                    .ok()
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or(LogFormat::Text);

        let level =
            std::env::var(LOG_LEVEL_ENV_VAR).unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        Self::new(format, level, verbose)
    }

    /// Initialize logging with the configured settings
    ///
    /// This should be called once at the start of your program.
    ///
    /// # Panics
    ///
    /// Panics if the logging subscriber has already been initialized
    pub fn init(&self) {
        if let Err(e) = self.try_init() {
            panic!("failed to initialize logging: {}", e);
        }
    }

    /// Initialize logging, returning an error if a subscriber is already set
    pub fn try_init(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        use tracing_subscriber::EnvFilter;

        // --verbose beats RUST_LOG; otherwise RUST_LOG beats the configured level
        let filter = if self.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
        };

        match self.format {
            LogFormat::Json => {
                // One JSON object per line on stderr
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true)
                    .flatten_event(true)
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(true)
                    .try_init()
            }
            LogFormat::Pretty => {
                // Pretty output with colors for development
                tracing_subscriber::fmt()
                    .pretty()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(true)
                    .try_init()
            }
            LogFormat::Text => {
                // Plain text for end users
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_level(true)
                    .try_init()
            }
        }
    }
}

/// Initialize logging with default settings
///
/// Respects `CROSSPOST_LOG_FORMAT` and `CROSSPOST_LOG_LEVEL` environment variables.
/// Falls back to text format with warn level if not set.
///
/// # Examples
///
/// ```bash
/// export CROSSPOST_LOG_FORMAT=json
/// export CROSSPOST_LOG_LEVEL=debug
/// crosspost "Hello world"
/// ```
pub fn init_default() {
    LoggingConfig::from_env(None, false).init();
}
