//! Integration tests for error payloads reaching sinks.

mod common;

use brightline_telemetry::{
    CIRCULAR, ErrorObject, Field, Level, LogRecord, TelemetryError, serialize,
};
use common::capture;
use serde_json::{Value, json};

fn chain(depth: usize) -> ErrorObject {
    let mut error = ErrorObject::new("RootError", "level 0").with_stack("at root");
    for i in 1..=depth {
        error = ErrorObject::new(format!("Error{i}"), format!("level {i}"))
            .with_stack(format!("at frame {i}"))
            .with_cause(error);
    }
    error
}

fn cause_depth(mut node: &Value) -> usize {
    let mut depth = 0_usize;
    while let Some(cause) = node.get("cause") {
        depth = depth.saturating_add(1);
        node = cause;
    }
    depth
}

#[test]
fn test_cause_chain_reaches_sink_intact() {
    let (factory, sink) = capture(Level::Info);

    for depth in [0, 1, 3, 12] {
        factory
            .get_logger("Chains")
            .log_error_object(Level::Error, "failed", chain(depth));

        let entry = sink.last().unwrap();
        let error = entry.get("error").unwrap();
        assert_eq!(cause_depth(error), depth);

        let mut node = error;
        for i in (0..=depth).rev() {
            assert_eq!(node["message"], format!("level {i}"));
            node = node.get("cause").unwrap_or(&Value::Null);
        }
    }
}

#[test]
fn test_cyclic_cause_is_truncated() {
    let (factory, sink) = capture(Level::Info);

    let first = ErrorObject::new("First", "one").into_shared();
    let second = ErrorObject::new("Second", "two").into_shared();
    first.set_cause(second.clone());
    second.set_cause(first.clone());

    factory
        .get_logger("Cycles")
        .log_error_object(Level::Error, "loop", ErrorObject::new("Top", "top").with_cause(first));

    let error = sink.last().unwrap().get("error").cloned().unwrap();
    assert_eq!(error["cause"]["name"], "First");
    assert_eq!(error["cause"]["cause"]["name"], "Second");
    assert_eq!(error["cause"]["cause"]["cause"], CIRCULAR);
}

#[test]
fn test_self_referential_metadata() {
    let (factory, sink) = capture(Level::Info);

    let node = Field::map([("name", Field::from("node"))]);
    assert!(node.insert("self", node.clone()));

    factory
        .get_logger("Graphs")
        .emit(LogRecord::new(Level::Info, "graph").with_meta("node", node.clone()));
    factory
        .get_logger("Graphs")
        .emit(LogRecord::new(Level::Info, "graph again").with_meta("node", node));

    for entry in sink.entries() {
        assert_eq!(
            entry.get("node"),
            Some(&json!({"name": "node", "self": CIRCULAR}))
        );
    }
    assert_eq!(sink.len(), 2);
}

#[test]
fn test_telemetry_error_carries_code() {
    let err = TelemetryError::configuration("sink", std::io::Error::other("refused"));
    let value = serialize(&ErrorObject::from(&err).into());

    assert_eq!(value["name"], "ConfigurationError");
    assert_eq!(value["code"], 1001);
    assert_eq!(value["cause"]["message"], "refused");
}
