//! Sinks receive finished [`LogEntry`] values.
//!
//! Delivery is the sink's business: a sink that fails to write reports it and
//! moves on, it never fails the log call.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::BoxError;
use crate::level::Level;
use crate::record::LogEntry;

/// Destination for finished records.
pub trait Sink: Send + Sync {
    /// Short name, for diagnostics.
    fn name(&self) -> &str;

    /// Optional threshold of this sink, applied after the logger's own.
    fn level(&self) -> Option<Level> {
        None
    }

    /// Deliver one entry.
    fn log(&self, entry: &LogEntry);
}

/// Fallible sink constructor, run when a logger is created.
pub trait MakeSink: Send + Sync {
    /// Build the sink.
    ///
    /// # Errors
    ///
    /// Returns the construction failure; the logger factory wraps it as a
    /// configuration error.
    fn make_sink(&self) -> Result<Arc<dyn Sink>, BoxError>;
}

/// Console stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleStream {
    /// Standard output (default).
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
}

/// Writes each entry's encoded line to stdout or stderr.
#[derive(Debug, Clone, Default)]
pub struct ConsoleSink {
    stream: ConsoleStream,
    level: Option<Level>,
}

impl ConsoleSink {
    /// Console sink on `stream` with no threshold of its own.
    #[must_use]
    pub fn new(stream: ConsoleStream) -> Self {
        Self {
            stream,
            level: None,
        }
    }

    /// Restrict this sink to `level` and more severe.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    fn write_line(&self, line: &str) -> std::io::Result<()> {
        match self.stream {
            ConsoleStream::Stdout => writeln!(std::io::stdout().lock(), "{line}"),
            ConsoleStream::Stderr => writeln!(std::io::stderr().lock(), "{line}"),
        }
    }
}

impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        match self.stream {
            ConsoleStream::Stdout => "console:stdout",
            ConsoleStream::Stderr => "console:stderr",
        }
    }

    fn level(&self) -> Option<Level> {
        self.level
    }

    fn log(&self, entry: &LogEntry) {
        if let Err(e) = self.write_line(entry.line()) {
            tracing::warn!(sink = self.name(), error = %e, "Failed to write log entry");
        }
    }
}

/// Keeps entries in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<LogEntry>>>,
    level: Option<Level>,
}

impl MemorySink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict this sink to `level` and more severe.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Copy of every entry received so far.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Encoded lines of every entry received so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| entry.line().to_string())
            .collect()
    }

    /// Most recent entry.
    #[must_use]
    pub fn last(&self) -> Option<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Number of entries received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every stored entry.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn level(&self) -> Option<Level> {
        self.level
    }

    fn log(&self, entry: &LogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
    }
}

impl MakeSink for MemorySink {
    fn make_sink(&self) -> Result<Arc<dyn Sink>, BoxError> {
        Ok(Arc::new(self.clone()))
    }
}

/// Serializable console sink settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSinkConfig {
    /// Stream to write to.
    #[serde(default)]
    pub stream: ConsoleStream,
    /// Threshold of this sink.
    #[serde(default)]
    pub level: Option<Level>,
}

impl MakeSink for ConsoleSinkConfig {
    fn make_sink(&self) -> Result<Arc<dyn Sink>, BoxError> {
        let sink = ConsoleSink::new(self.stream);
        Ok(Arc::new(match self.level {
            Some(level) => sink.with_level(level),
            None => sink,
        }))
    }
}

/// One configured sink.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Console output.
    Console(ConsoleSinkConfig),
    /// In-memory capture.
    #[serde(skip)]
    Memory(MemorySink),
    /// A sink built in code.
    #[serde(skip)]
    Custom(Arc<dyn MakeSink>),
}

impl SinkConfig {
    /// Default console sink on stdout.
    #[must_use]
    pub fn console() -> Self {
        SinkConfig::Console(ConsoleSinkConfig::default())
    }

    /// Build the sink.
    ///
    /// # Errors
    ///
    /// Returns the construction failure of the underlying sink.
    pub fn build(&self) -> Result<Arc<dyn Sink>, BoxError> {
        match self {
            SinkConfig::Console(config) => config.make_sink(),
            SinkConfig::Memory(sink) => sink.make_sink(),
            SinkConfig::Custom(make) => make.make_sink(),
        }
    }
}

impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkConfig::Console(config) => f.debug_tuple("Console").field(config).finish(),
            SinkConfig::Memory(sink) => write!(f, "Memory(len={})", sink.len()),
            SinkConfig::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
