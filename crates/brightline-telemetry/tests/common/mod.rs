//! Shared helpers for integration tests.

use brightline_telemetry::{Level, LoggerFactory, LoggerOptions, MemorySink};

/// A factory whose base logger writes to a fresh in-memory sink.
pub fn capture(level: Level) -> (LoggerFactory, MemorySink) {
    let sink = MemorySink::new();
    let factory = LoggerFactory::new();
    factory
        .create_logger(&LoggerOptions::new(level).with_memory_sink(&sink))
        .unwrap();
    (factory, sink)
}
