//! Severity levels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Ordered log severity.
///
/// Variants are ordered from most to least severe, so a threshold admits
/// every level that compares less than or equal to it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Failures that need attention.
    Error,
    /// Unexpected but recoverable conditions.
    Warn,
    /// Normal operational messages (default).
    #[default]
    Info,
    /// Request/response traffic.
    Http,
    /// Detailed operational messages.
    Verbose,
    /// Developer diagnostics.
    Debug,
    /// Everything.
    Trace,
}

impl Level {
    /// All levels, most severe first.
    pub const ALL: [Level; 7] = [
        Level::Error,
        Level::Warn,
        Level::Info,
        Level::Http,
        Level::Verbose,
        Level::Debug,
        Level::Trace,
    ];

    /// Lowercase name of the level.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Http => "http",
            Level::Verbose => "verbose",
            Level::Debug => "debug",
            Level::Trace => "trace",
        }
    }

    /// Whether a record at `level` passes a threshold of `self`.
    #[must_use]
    pub fn allows(self, level: Level) -> bool {
        level <= self
    }

    /// Closest `tracing` filter directive for this threshold.
    ///
    /// `tracing` has no `http`/`verbose` levels; events it produces never map
    /// onto them, so both filter as `info`.
    #[must_use]
    pub fn as_directive(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info | Level::Http | Level::Verbose => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log level: {0:?}")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Level::ALL
            .into_iter()
            .find(|level| level.as_str() == lower)
            .or(match lower.as_str() {
                "warning" => Some(Level::Warn),
                _ => None,
            })
            .ok_or_else(|| ParseLevelError(s.to_string()))
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::INFO => Level::Info,
            tracing::Level::DEBUG => Level::Debug,
            _ => Level::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_verbosity() {
        assert!(Level::Error < Level::Warn);
        assert!(Level::Info < Level::Http);
        assert!(Level::Debug < Level::Trace);
    }

    #[test]
    fn threshold_admits_more_severe() {
        assert!(Level::Info.allows(Level::Error));
        assert!(Level::Info.allows(Level::Info));
        assert!(!Level::Info.allows(Level::Debug));
        assert!(Level::Trace.allows(Level::Verbose));
    }

    #[test]
    fn parse_levels() {
        assert_eq!("INFO".parse::<Level>().unwrap(), Level::Info);
        assert_eq!("warning".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!(" verbose ".parse::<Level>().unwrap(), Level::Verbose);
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&Level::Http).unwrap();
        assert_eq!(json, "\"http\"");
        let parsed: Level = serde_json::from_str("\"debug\"").unwrap();
        assert_eq!(parsed, Level::Debug);
    }

    #[test]
    fn tracing_levels_map() {
        assert_eq!(Level::from(tracing::Level::WARN), Level::Warn);
        assert_eq!(Level::from(tracing::Level::TRACE), Level::Trace);
    }
}
