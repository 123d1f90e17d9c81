//! Prelude module - commonly used types for convenient import.
//!
//! Use `use brightline_telemetry::prelude::*;` to import all essential types.

// Diagnostic context
pub use crate::{RequestContext, mdc};

// Logger types
pub use crate::{Level, Logger, LoggerFactory, LoggerOptions};

// Values and errors
pub use crate::{ErrorObject, Field, Meta, TelemetryError, TelemetryResult};

// Pipeline and sinks
pub use crate::{FormatSpec, FormatStep, LogEntry, LogRecord, MemorySink, Sink, SinkConfig};
