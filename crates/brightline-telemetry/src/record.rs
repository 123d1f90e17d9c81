//! Log records as they move through the pipeline.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::field::{Field, Meta};
use crate::level::Level;
use crate::serialize::serialize;

/// Key of the RFC 3339 timestamp.
pub const TIMESTAMP_KEY: &str = "timestamp";
/// Key of the level name.
pub const LEVEL_KEY: &str = "level";
/// Key of the message text.
pub const MESSAGE_KEY: &str = "message";
/// Key of the logger label.
pub const LABEL_KEY: &str = "label";
/// Key of the serialized error payload.
pub const ERROR_KEY: &str = "error";

/// Keys owned by the record itself; metadata cannot override them.
pub const RESERVED_KEYS: [&str; 5] = [TIMESTAMP_KEY, LEVEL_KEY, MESSAGE_KEY, LABEL_KEY, ERROR_KEY];

/// A record before it has been through the pipeline.
///
/// Metadata and the error payload may still hold arbitrary value graphs here.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// When the record was stamped.
    pub timestamp: Option<DateTime<Utc>>,
    /// Severity.
    pub level: Level,
    /// Message text.
    pub message: String,
    /// Identity of the logger that produced the record.
    pub label: Option<String>,
    /// Structured metadata.
    pub meta: Meta,
    /// Error payload.
    pub error: Option<Field>,
}

impl LogRecord {
    /// New record with no metadata.
    #[must_use]
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            level,
            message: message.into(),
            label: None,
            meta: Meta::new(),
            error: None,
        }
    }

    /// Set the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a metadata field.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Field>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Attach an error payload.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<Field>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Whether every metadata field and the error payload are JSON-safe.
    #[must_use]
    pub fn is_serialized(&self) -> bool {
        self.meta.values().all(|field| matches!(field, Field::Json(_)))
            && self
                .error
                .as_ref()
                .is_none_or(|field| matches!(field, Field::Json(_)))
    }

    /// Flatten into a key-ordered JSON object.
    ///
    /// Fields that are still raw graphs are serialized here, so the result is
    /// JSON-safe whatever state the record is in.
    #[must_use]
    pub fn to_json_map(&self) -> Map<String, Value> {
        let mut map: Map<String, Value> = self
            .meta
            .iter()
            .map(|(key, field)| (key.clone(), serialize(field)))
            .collect();
        if let Some(ts) = self.timestamp {
            map.insert(TIMESTAMP_KEY.into(), Value::String(format_timestamp(ts)));
        } else {
            map.remove(TIMESTAMP_KEY);
        }
        map.insert(LEVEL_KEY.into(), Value::String(self.level.as_str().into()));
        map.insert(MESSAGE_KEY.into(), Value::String(self.message.clone()));
        match &self.label {
            Some(label) => {
                map.insert(LABEL_KEY.into(), Value::String(label.clone()));
            },
            None => {
                map.remove(LABEL_KEY);
            },
        }
        match &self.error {
            Some(error) => {
                map.insert(ERROR_KEY.into(), serialize(error));
            },
            None => {
                map.remove(ERROR_KEY);
            },
        }
        map
    }
}

/// Timestamp format used in encoded records: RFC 3339, UTC, milliseconds.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A finished record, ready for sinks.
///
/// Holds only JSON values, so a sink can never receive a cyclic or
/// non-serializable graph.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    level: Level,
    fields: Map<String, Value>,
    line: String,
}

impl LogEntry {
    pub(crate) fn new(level: Level, fields: Map<String, Value>, line: String) -> Self {
        Self {
            level,
            fields,
            line,
        }
    }

    /// Severity.
    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    /// Every field, key-ordered.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// A single field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The encoded line.
    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Message text.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.get(MESSAGE_KEY).and_then(Value::as_str)
    }

    /// Logger label.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.get(LABEL_KEY).and_then(Value::as_str)
    }

    /// Parsed timestamp.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.get(TIMESTAMP_KEY)
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}
