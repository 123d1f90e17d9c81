//! The record pipeline.
//!
//! Every record runs through the same ordered steps:
//!
//! 1. [`Timestamp`]: stamp the record unless a timestamp is already set.
//! 2. [`InjectContext`]: copy the current [`mdc`](crate::mdc) context into the
//!    metadata. Explicit metadata wins over context values.
//! 3. Caller steps from [`LoggerOptions::format`](crate::LoggerOptions), in order.
//! 4. [`SerializeFields`]: turn every metadata field and the error payload
//!    into JSON with the cycle-safe serializer.
//!
//! The result is then encoded by an [`Encoding`] into a [`LogEntry`]. A step
//! may drop the record by returning `None`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::field::Field;
use crate::mdc;
use crate::record::{
    LABEL_KEY, LEVEL_KEY, LogEntry, LogRecord, MESSAGE_KEY, RESERVED_KEYS, TIMESTAMP_KEY,
};
use crate::serialize::serialize;

/// One transform applied to every record.
pub trait FormatStep: Send + Sync {
    /// Short name, for diagnostics.
    fn name(&self) -> &str;

    /// Transform the record, or return `None` to drop it.
    fn transform(&self, record: LogRecord) -> Option<LogRecord>;
}

/// Stamps the current time on records that have none.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamp;

impl FormatStep for Timestamp {
    fn name(&self) -> &str {
        "timestamp"
    }

    fn transform(&self, mut record: LogRecord) -> Option<LogRecord> {
        if record.timestamp.is_none() {
            record.timestamp = Some(chrono::Utc::now());
        }
        Some(record)
    }
}

/// Copies the caller's diagnostic context into the record metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct InjectContext;

impl FormatStep for InjectContext {
    fn name(&self) -> &str {
        "context"
    }

    fn transform(&self, mut record: LogRecord) -> Option<LogRecord> {
        for (key, value) in mdc::snapshot() {
            record.meta.entry(key).or_insert(Field::String(value));
        }
        Some(record)
    }
}

/// Replaces every metadata field and the error payload with its serialized
/// JSON form.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializeFields;

impl FormatStep for SerializeFields {
    fn name(&self) -> &str {
        "serialize"
    }

    fn transform(&self, mut record: LogRecord) -> Option<LogRecord> {
        for field in record.meta.values_mut() {
            if !matches!(field, Field::Json(_)) {
                *field = Field::Json(serialize(field));
            }
        }
        if let Some(error) = record.error.as_mut() {
            if !matches!(error, Field::Json(_)) {
                *error = Field::Json(serialize(error));
            }
        }
        Some(record)
    }
}

/// Invalid configuration of a built-in step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// A field name was empty.
    #[error("{step}: field names must not be empty")]
    EmptyKey {
        /// Step being built.
        step: &'static str,
    },
    /// A reserved record key was used as a metadata field.
    #[error("{step}: `{key}` is a reserved record key")]
    ReservedKey {
        /// Step being built.
        step: &'static str,
        /// Offending key.
        key: String,
    },
    /// Two fields were renamed to the same target.
    #[error("{step}: more than one field renamed to `{key}`")]
    DuplicateTarget {
        /// Step being built.
        step: &'static str,
        /// Target named twice.
        key: String,
    },
    /// The step was given nothing to do.
    #[error("{step}: no fields configured")]
    NoFields {
        /// Step being built.
        step: &'static str,
    },
}

fn check_key(step: &'static str, key: &str) -> Result<(), FormatError> {
    if key.is_empty() {
        return Err(FormatError::EmptyKey { step });
    }
    if RESERVED_KEYS.contains(&key) {
        return Err(FormatError::ReservedKey {
            step,
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Renames metadata fields.
#[derive(Debug, Clone)]
pub struct RenameFields {
    renames: Vec<(String, String)>,
}

impl RenameFields {
    const STEP: &'static str = "rename";

    /// Build from `(from, to)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if no pairs are given, a name is empty or reserved, or
    /// two fields are renamed to the same target.
    pub fn new<I, K, V>(pairs: I) -> Result<Self, FormatError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut targets = BTreeSet::new();
        let mut renames = Vec::new();
        for (from, to) in pairs {
            let (from, to) = (from.into(), to.into());
            check_key(Self::STEP, &from)?;
            check_key(Self::STEP, &to)?;
            if !targets.insert(to.clone()) {
                return Err(FormatError::DuplicateTarget {
                    step: Self::STEP,
                    key: to,
                });
            }
            renames.push((from, to));
        }
        if renames.is_empty() {
            return Err(FormatError::NoFields { step: Self::STEP });
        }
        Ok(Self { renames })
    }
}

impl FormatStep for RenameFields {
    fn name(&self) -> &str {
        Self::STEP
    }

    fn transform(&self, mut record: LogRecord) -> Option<LogRecord> {
        for (from, to) in &self.renames {
            if let Some(value) = record.meta.remove(from) {
                record.meta.insert(to.clone(), value);
            }
        }
        Some(record)
    }
}

/// Default replacement text of [`RedactFields`].
pub const REDACTED: &str = "[REDACTED]";

/// Masks the values of sensitive metadata fields.
#[derive(Debug, Clone)]
pub struct RedactFields {
    keys: BTreeSet<String>,
    mask: String,
}

impl RedactFields {
    const STEP: &'static str = "redact";

    /// Build a step masking `keys` with `mask`.
    ///
    /// # Errors
    ///
    /// Returns an error if no keys are given or a key is empty or reserved.
    pub fn new<I, K>(keys: I, mask: impl Into<String>) -> Result<Self, FormatError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut set = BTreeSet::new();
        for key in keys {
            let key = key.into();
            check_key(Self::STEP, &key)?;
            set.insert(key);
        }
        if set.is_empty() {
            return Err(FormatError::NoFields { step: Self::STEP });
        }
        Ok(Self {
            keys: set,
            mask: mask.into(),
        })
    }
}

impl FormatStep for RedactFields {
    fn name(&self) -> &str {
        Self::STEP
    }

    fn transform(&self, mut record: LogRecord) -> Option<LogRecord> {
        for key in &self.keys {
            if let Some(value) = record.meta.get_mut(key) {
                *value = Field::String(self.mask.clone());
            }
        }
        Some(record)
    }
}

struct FnStep<F> {
    name: String,
    f: F,
}

impl<F> FormatStep for FnStep<F>
where
    F: Fn(LogRecord) -> Option<LogRecord> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, record: LogRecord) -> Option<LogRecord> {
        (self.f)(record)
    }
}

/// Wrap a closure as a format step.
pub fn step_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn FormatStep>
where
    F: Fn(LogRecord) -> Option<LogRecord> + Send + Sync + 'static,
{
    Arc::new(FnStep {
        name: name.into(),
        f,
    })
}

fn default_mask() -> String {
    REDACTED.to_string()
}

/// Configuration of a caller-supplied step.
///
/// Built-in steps are validated when the logger is constructed, so a
/// malformed spec fails [`LoggerFactory::create_logger`](crate::LoggerFactory::create_logger).
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormatSpec {
    /// Rename metadata fields (`from` → `to`).
    Rename {
        /// Field renames.
        fields: BTreeMap<String, String>,
    },
    /// Mask metadata fields.
    Redact {
        /// Fields to mask.
        keys: Vec<String>,
        /// Replacement text.
        #[serde(default = "default_mask")]
        mask: String,
    },
    /// A step supplied in code.
    #[serde(skip)]
    Custom(Arc<dyn FormatStep>),
}

impl FormatSpec {
    /// Build the step.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in step is misconfigured.
    pub fn build(&self) -> Result<Arc<dyn FormatStep>, FormatError> {
        match self {
            FormatSpec::Rename { fields } => Ok(Arc::new(RenameFields::new(fields.clone())?)),
            FormatSpec::Redact { keys, mask } => {
                Ok(Arc::new(RedactFields::new(keys.clone(), mask.clone())?))
            },
            FormatSpec::Custom(step) => Ok(Arc::clone(step)),
        }
    }
}

impl fmt::Debug for FormatSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatSpec::Rename { fields } => {
                f.debug_struct("Rename").field("fields", fields).finish()
            },
            FormatSpec::Redact { keys, mask } => f
                .debug_struct("Redact")
                .field("keys", keys)
                .field("mask", mask)
                .finish(),
            FormatSpec::Custom(step) => f.debug_tuple("Custom").field(&step.name()).finish(),
        }
    }
}

/// Structural encoding of finished records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Single-line JSON with keys in sorted order (default).
    #[default]
    Json,
    /// Human-readable line: `timestamp LEVEL [label] message key=value ...`.
    Line,
}

impl Encoding {
    /// Encode a flattened record.
    #[must_use]
    pub fn encode(self, fields: &Map<String, Value>) -> String {
        match self {
            Encoding::Json => serde_json::to_string(fields)
                .unwrap_or_else(|e| format!("{{\"encode_error\":{:?}}}", e.to_string())),
            Encoding::Line => encode_line(fields),
        }
    }
}

fn encode_line(fields: &Map<String, Value>) -> String {
    let text = |key: &str| fields.get(key).and_then(Value::as_str).unwrap_or_default();

    let mut parts = Vec::new();
    if let Some(ts) = fields.get(TIMESTAMP_KEY).and_then(Value::as_str) {
        parts.push(ts.to_string());
    }
    parts.push(format!("{:<7}", text(LEVEL_KEY).to_ascii_uppercase()));
    if let Some(label) = fields.get(LABEL_KEY).and_then(Value::as_str) {
        parts.push(format!("[{label}]"));
    }
    parts.push(text(MESSAGE_KEY).to_string());

    for (key, value) in fields {
        if matches!(key.as_str(), TIMESTAMP_KEY | LEVEL_KEY | LABEL_KEY | MESSAGE_KEY) {
            continue;
        }
        let rendered = match value {
            Value::String(s) if !s.is_empty() && !s.contains(char::is_whitespace) => s.clone(),
            other => other.to_string(),
        };
        parts.push(format!("{key}={rendered}"));
    }
    parts.join(" ")
}

/// Ordered steps plus the final encoder.
#[derive(Clone)]
pub struct Pipeline {
    steps: Vec<Arc<dyn FormatStep>>,
    encoding: Encoding,
}

impl Pipeline {
    /// Build the standard pipeline around `custom` steps.
    pub fn new(custom: impl IntoIterator<Item = Arc<dyn FormatStep>>, encoding: Encoding) -> Self {
        let mut steps: Vec<Arc<dyn FormatStep>> =
            vec![Arc::new(Timestamp), Arc::new(InjectContext)];
        steps.extend(custom);
        steps.push(Arc::new(SerializeFields));
        Self { steps, encoding }
    }

    /// Names of every step, in order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Encoding applied after the last step.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Run a record through every step and encode it.
    ///
    /// Returns `None` if a step dropped the record.
    #[must_use]
    pub fn run(&self, record: LogRecord) -> Option<LogEntry> {
        let record = self
            .steps
            .iter()
            .try_fold(record, |record, step| step.transform(record))?;
        let fields = record.to_json_map();
        let line = self.encoding.encode(&fields);
        Some(LogEntry::new(record.level, fields, line))
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new([], Encoding::default())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.step_names())
            .field("encoding", &self.encoding)
            .finish()
    }
}
