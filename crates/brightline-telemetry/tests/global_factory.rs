//! Integration test for the process-wide factory functions.
//!
//! Kept in its own test binary: it is the only test touching the global state.

use brightline_telemetry::{
    Level, LoggerOptions, MemorySink, TelemetryError, create_logger, get_logger, global,
    try_get_logger,
};

#[test]
fn test_global_factory_lifecycle() {
    assert!(!global().is_initialized());
    let err = try_get_logger("Early").unwrap_err();
    assert_eq!(err.code(), TelemetryError::NOT_INITIALIZED);

    let sink = MemorySink::new();
    create_logger(&LoggerOptions::new(Level::Info).with_memory_sink(&sink)).unwrap();

    get_logger("Mod").info("via global");
    try_get_logger("Strict").unwrap().warn("also via global");

    let labels: Vec<_> = sink
        .entries()
        .iter()
        .map(|entry| entry.label().map(str::to_string))
        .collect();
    assert_eq!(labels, vec![Some("Mod".to_string()), Some("Strict".to_string())]);
}
