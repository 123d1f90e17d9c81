//! Logger configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

use crate::error::{TelemetryError, TelemetryResult};
use crate::level::Level;
use crate::pipeline::{Encoding, FormatSpec, FormatStep};
use crate::sink::{MakeSink, MemorySink, SinkConfig};

/// Options for [`LoggerFactory::create_logger`](crate::LoggerFactory::create_logger).
///
/// Everything except code-supplied steps and sinks can be loaded from TOML:
///
/// ```toml
/// level = "debug"
/// encoding = "line"
///
/// [default_meta]
/// service = "billing"
///
/// [[format]]
/// type = "redact"
/// keys = ["password"]
///
/// [[sinks]]
/// type = "console"
/// stream = "stderr"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggerOptions {
    /// Least severe level that is logged.
    #[serde(default)]
    pub level: Level,
    /// Extra pipeline steps, run after context injection and before
    /// serialization.
    #[serde(default)]
    pub format: Vec<FormatSpec>,
    /// Metadata merged into every record.
    #[serde(default)]
    pub default_meta: Map<String, Value>,
    /// Sinks, in delivery order. Empty means one console sink on stdout.
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
    /// Structural encoding of finished records.
    #[serde(default)]
    pub encoding: Encoding,
}

impl LoggerOptions {
    /// Options with the given level and defaults otherwise.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set the level.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Add a configured step.
    #[must_use]
    pub fn with_format(mut self, spec: FormatSpec) -> Self {
        self.format.push(spec);
        self
    }

    /// Add a step supplied in code.
    #[must_use]
    pub fn with_step(self, step: Arc<dyn FormatStep>) -> Self {
        self.with_format(FormatSpec::Custom(step))
    }

    /// Add a default metadata field.
    #[must_use]
    pub fn with_default_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default_meta.insert(key.into(), value.into());
        self
    }

    /// Add a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: SinkConfig) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Add a sink built in code.
    #[must_use]
    pub fn with_make_sink(self, make: Arc<dyn MakeSink>) -> Self {
        self.with_sink(SinkConfig::Custom(make))
    }

    /// Add an in-memory sink. The caller keeps a clone to read entries back.
    #[must_use]
    pub fn with_memory_sink(self, sink: &MemorySink) -> Self {
        self.with_sink(SinkConfig::Memory(sink.clone()))
    }

    /// Set the encoding.
    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Parse options from TOML.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the document is not valid options.
    pub fn from_toml_str(source: &str) -> TelemetryResult<Self> {
        toml::from_str(source)
            .map_err(|e| TelemetryError::configuration("invalid logger options", e))
    }

    /// Read and parse options from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, or a configuration
    /// error if it is not valid options.
    pub fn from_toml_file(path: impl AsRef<Path>) -> TelemetryResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }
}
