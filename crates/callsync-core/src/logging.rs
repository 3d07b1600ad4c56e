//! Logging setup for hosts embedding the orchestrator
//!
//! The library only emits `tracing` events under the `callsync_core` target.
//! Hosts that do not install their own subscriber can call [`setup_logging`]
//! once at startup. The orchestrator's own events and those of its
//! dependencies are filtered separately, so call transitions can be traced at
//! `debug` without drowning in runtime noise. `RUST_LOG`, when set, replaces
//! both levels.

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{OrchestratorError, OrchestratorResult};

const CRATE_TARGET: &str = "callsync_core";

/// Output shape of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Full,
    /// One line per event, for device consoles
    Compact,
    /// Newline-delimited JSON on stdout, for log shipping
    Json,
}

impl FromStr for LogFormat {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(OrchestratorError::internal_error(format!(
                "Invalid log format: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for the orchestrator's own events
    pub level: Level,
    /// Level for everything else (tokio, transport adapters, the host)
    pub dependency_level: Level,
    pub format: LogFormat,
    pub file_info: bool,
    /// Log call-handling spans as they open and close
    pub span_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            dependency_level: Level::WARN,
            format: LogFormat::Full,
            file_info: false,
            span_events: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn with_dependency_level(mut self, level: Level) -> Self {
        self.dependency_level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_span_events(mut self) -> Self {
        self.span_events = true;
        self
    }

    /// Filter directives used when `RUST_LOG` is unset
    pub fn directives(&self) -> String {
        format!(
            "{},{}={}",
            level_name(self.dependency_level),
            CRATE_TARGET,
            level_name(self.level)
        )
    }
}

fn level_name(level: Level) -> String {
    level.to_string().to_ascii_lowercase()
}

/// Install a global fmt subscriber. Fails if one is already installed.
pub fn setup_logging(config: LoggingConfig) -> OrchestratorResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directives()));

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let result = match config.format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().with_writer(std::io::stdout).try_init(),
    };

    result.map_err(|e| OrchestratorError::internal_error(format!("logging setup failed: {e}")))
}

/// Parse a level name such as `debug` or `WARN`
pub fn parse_log_level(level: &str) -> OrchestratorResult<Level> {
    Level::from_str(level)
        .map_err(|_| OrchestratorError::internal_error(format!("Invalid log level: {level}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(parse_log_level("chatty").is_err());
    }

    #[test]
    fn test_directives_split_crate_and_dependencies() {
        assert_eq!(LoggingConfig::default().directives(), "warn,callsync_core=info");

        let config = LoggingConfig::new(Level::TRACE).with_dependency_level(Level::ERROR);
        assert_eq!(config.directives(), "error,callsync_core=trace");
        assert!(EnvFilter::try_new(config.directives()).is_ok());
    }

    #[test]
    fn test_log_format_names() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
