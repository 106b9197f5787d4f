//! Logging bootstrap for postal services.
//!
//! Library crates in this workspace only emit [`tracing`] events. Binaries
//! call [`init`] once at startup to install a subscriber configured from the
//! environment.
//!
//! # Environment Variables
//!
//! - `POSTAL_DEBUG=1` - Force debug level
//! - `POSTAL_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `POSTAL_LOG_FORMAT=pretty|compact|json` - Set output format (default `json`)
//! - `POSTAL_LOG_COLOR=1|0` - Enable/disable ANSI colors for non-JSON output
//! - `RUST_LOG` - Full `EnvFilter` directive, overrides the level when set
//!
//! # Usage
//!
//! ```rust
//! postal_log::try_init().ok();
//! tracing::info!(workers = 4, "worker pool ready");
//! ```

use once_cell::sync::Lazy;
use std::env;
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level of events written by the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level (least verbose)
    Error,
    /// No logging
    Off,
}

impl Level {
    /// Directive understood by [`EnvFilter`].
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "off" | "none" => Ok(Level::Off),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_directive())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable output
    Pretty,
    /// Single-line human readable output
    Compact,
    /// One JSON object per line
    Json,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Format::Pretty),
            "compact" => Ok(Format::Compact),
            "json" => Ok(Format::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether ANSI colors are used (ignored for JSON)
    pub color: bool,
    /// Whether the event target (module path) is printed
    pub target: bool,
    /// Raw `RUST_LOG` directive, takes precedence over `level`
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Json,
            color: false,
            target: true,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| {
            lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        };

        let debug = flag("POSTAL_DEBUG").unwrap_or(false);

        let level = lookup("POSTAL_LOG_LEVEL")
            .and_then(|s| s.parse().ok())
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("POSTAL_LOG_FORMAT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(Format::Json);

        let color = flag("POSTAL_LOG_COLOR")
            .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some());

        let target = flag("POSTAL_LOG_TARGET").unwrap_or(true);

        let filter = lookup("RUST_LOG").filter(|s| !s.trim().is_empty());

        Self {
            level,
            format,
            color,
            target,
            filter,
        }
    }

    /// Set the level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the format.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Build the [`EnvFilter`] for this configuration.
    pub fn env_filter(&self) -> EnvFilter {
        match &self.filter {
            Some(directive) => EnvFilter::try_new(directive)
                .unwrap_or_else(|_| EnvFilter::new(self.level.as_directive())),
            None => EnvFilter::new(self.level.as_directive()),
        }
    }
}

/// Get the configuration read from the environment.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

// ============================================================================
// Subscriber installation
// ============================================================================

/// Error returned when a global subscriber is already installed.
#[derive(Debug)]
pub struct InitError(String);

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to install log subscriber: {}", self.0)
    }
}

impl std::error::Error for InitError {}

/// Install the global subscriber using the environment configuration.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init() {
    let _ = try_init();
}

/// Install the global subscriber, reporting whether one was already set.
pub fn try_init() -> Result<(), InitError> {
    try_init_with(config())
}

/// Install the global subscriber for an explicit configuration.
pub fn try_init_with(config: &LogConfig) -> Result<(), InitError> {
    let filter = config.env_filter();
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        Format::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(config.target),
            )
            .try_init(),
        Format::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_ansi(config.color)
                    .with_target(config.target),
            )
            .try_init(),
        Format::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_ansi(config.color)
                    .with_target(config.target),
            )
            .try_init(),
    };

    result.map_err(|e| InitError(e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("debug".parse::<Level>(), Ok(Level::Debug));
        assert_eq!("DEBUG".parse::<Level>(), Ok(Level::Debug));
        assert_eq!("warning".parse::<Level>(), Ok(Level::Warn));
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("pretty".parse::<Format>(), Ok(Format::Pretty));
        assert_eq!("Compact".parse::<Format>(), Ok(Format::Compact));
        assert_eq!("json".parse::<Format>(), Ok(Format::Json));
        assert!("xml".parse::<Format>().is_err());
    }

    #[test]
    fn test_defaults_from_empty_env() {
        let config = LogConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, Format::Json);
        assert!(!config.color);
        assert!(config.filter.is_none());
    }

    #[test]
    fn test_debug_flag_lowers_level() {
        let config = LogConfig::from_lookup(lookup_from(&[("POSTAL_DEBUG", "true")]));
        assert_eq!(config.level, Level::Debug);
    }

    #[test]
    fn test_explicit_level_wins_over_debug() {
        let config = LogConfig::from_lookup(lookup_from(&[
            ("POSTAL_DEBUG", "1"),
            ("POSTAL_LOG_LEVEL", "error"),
            ("POSTAL_LOG_FORMAT", "compact"),
        ]));
        assert_eq!(config.level, Level::Error);
        assert_eq!(config.format, Format::Compact);
    }

    #[test]
    fn test_blank_rust_log_is_ignored() {
        let config = LogConfig::from_lookup(lookup_from(&[("RUST_LOG", "  ")]));
        assert!(config.filter.is_none());

        let config = LogConfig::from_lookup(lookup_from(&[("RUST_LOG", "postal_pool=trace")]));
        assert_eq!(config.filter.as_deref(), Some("postal_pool=trace"));
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        assert!(try_init().is_err());
        tracing::info!(target: "postal_log::tests", "subscriber installed");
    }
}
