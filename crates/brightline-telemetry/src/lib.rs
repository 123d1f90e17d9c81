//! Brightline Telemetry - Diagnostic logging core for Brightline services.
//!
//! This crate provides:
//! - A mapped diagnostic context ([`mdc`]) scoped to one unit of work
//! - Cycle-safe serialization of error cause chains and value graphs
//! - A logger pipeline that stamps, enriches and encodes every record
//! - A logger factory handing out cheap labeled loggers
//! - A bridge that routes `tracing` events into the same pipeline
//!
//! # Example
//!
//! ```rust
//! use brightline_telemetry::{Level, LoggerFactory, LoggerOptions, MemorySink, mdc};
//!
//! # fn main() -> Result<(), brightline_telemetry::TelemetryError> {
//! let sink = MemorySink::new();
//! let factory = LoggerFactory::new();
//! factory.create_logger(
//!     &LoggerOptions::new(Level::Debug)
//!         .with_default_meta("service", "billing")
//!         .with_memory_sink(&sink),
//! )?;
//!
//! let logger = factory.get_logger("Invoices");
//! mdc::run_with_context_sync([("request_id", "r-42")], || {
//!     logger.info("invoice issued");
//! });
//!
//! let entry = sink.last().expect("one entry");
//! assert_eq!(entry.label(), Some("Invoices"));
//! assert_eq!(entry.get("request_id").and_then(|v| v.as_str()), Some("r-42"));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod mdc;
pub mod prelude;
pub mod serialize;

mod bridge;
mod config;
mod context;
mod error;
mod field;
mod level;
mod logger;
mod pipeline;
mod record;
mod sink;

pub use bridge::{PipelineLayer, TracingConfig, install_tracing};
pub use config::LoggerOptions;
pub use context::RequestContext;
pub use error::{BoxError, TelemetryError, TelemetryResult};
pub use field::{CIRCULAR, ErrorObject, Field, Meta, Shared};
pub use level::{Level, ParseLevelError};
pub use logger::{Logger, LoggerFactory, create_logger, get_logger, global, try_get_logger};
pub use pipeline::{
    Encoding, FormatError, FormatSpec, FormatStep, InjectContext, Pipeline, REDACTED,
    RedactFields, RenameFields, SerializeFields, Timestamp, step_fn,
};
pub use record::{
    ERROR_KEY, LABEL_KEY, LEVEL_KEY, LogEntry, LogRecord, MESSAGE_KEY, RESERVED_KEYS,
    TIMESTAMP_KEY, format_timestamp,
};
pub use serialize::{serialize, serialize_error, serialize_map};
pub use sink::{
    ConsoleSink, ConsoleSinkConfig, ConsoleStream, MakeSink, MemorySink, Sink, SinkConfig,
};
