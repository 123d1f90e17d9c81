//! Dynamic values carried by log records.
//!
//! A [`Field`] is an arbitrary value graph: primitives, shared mutable lists
//! and maps, and error-like objects. Shared nodes live behind
//! `Arc<RwLock<..>>`, so a graph may point back into itself. Node identity is
//! `Arc` pointer identity, which is what the serializer uses to detect cycles.

use serde::Serialize;
use serde_json::{Number, Value};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::TelemetryError;

/// Sentinel written where a value graph refers back to a node already on the
/// current path.
pub const CIRCULAR: &str = "[Circular]";

/// Shared, mutable node of a value graph.
pub type Shared<T> = Arc<RwLock<T>>;

/// Structured metadata attached to a record.
pub type Meta = BTreeMap<String, Field>;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// An arbitrary value that may be attached to a log record.
#[derive(Clone, Default)]
pub enum Field {
    /// Absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(Number),
    /// String.
    String(String),
    /// A value that is already JSON-safe.
    Json(Value),
    /// Shared sequence.
    List(Shared<Vec<Field>>),
    /// Shared mapping.
    Map(Shared<BTreeMap<String, Field>>),
    /// Error-like object.
    Error(Arc<ErrorObject>),
}

impl Field {
    /// New shared list.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Field>) -> Self {
        Field::List(Arc::new(RwLock::new(items.into_iter().collect())))
    }

    /// New shared map.
    #[must_use]
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Field)>) -> Self {
        Field::Map(Arc::new(RwLock::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        )))
    }

    /// Capture any serializable value as JSON.
    ///
    /// Values serde cannot represent become a descriptive string instead of
    /// failing.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Field::Json(value),
            Err(e) => Field::String(format!("[Unserializable: {e}]")),
        }
    }

    /// Capture an error and its `source()` chain.
    pub fn error(err: &(dyn std::error::Error + 'static)) -> Self {
        Field::Error(Arc::new(ErrorObject::from_dyn(err)))
    }

    /// Append to a list node. Returns `false` if this is not a list.
    pub fn push(&self, item: Field) -> bool {
        match self {
            Field::List(list) => {
                write(list).push(item);
                true
            },
            _ => false,
        }
    }

    /// Insert into a map node. Returns `false` if this is not a map.
    pub fn insert(&self, key: impl Into<String>, value: Field) -> bool {
        match self {
            Field::Map(map) => {
                write(map).insert(key.into(), value);
                true
            },
            _ => false,
        }
    }

    /// Identity of a shared node, `None` for plain values.
    #[must_use]
    pub fn identity(&self) -> Option<usize> {
        match self {
            Field::List(list) => Some(Arc::as_ptr(list).cast::<()>() as usize),
            Field::Map(map) => Some(Arc::as_ptr(map).cast::<()>() as usize),
            Field::Error(err) => Some(Arc::as_ptr(err).cast::<()>() as usize),
            _ => None,
        }
    }

    /// Whether this value is already JSON-safe without a graph walk.
    #[must_use]
    pub fn is_plain(&self) -> bool {
        !matches!(self, Field::List(_) | Field::Map(_) | Field::Error(_))
    }

    /// Snapshot of a list node's items.
    #[must_use]
    pub fn items(&self) -> Option<Vec<Field>> {
        match self {
            Field::List(list) => Some(read(list).clone()),
            _ => None,
        }
    }

    /// Snapshot of a map node's entries.
    #[must_use]
    pub fn entries(&self) -> Option<BTreeMap<String, Field>> {
        match self {
            Field::Map(map) => Some(read(map).clone()),
            _ => None,
        }
    }
}

// Debug stays shallow: a derived impl would recurse forever on a cyclic graph.
impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Null => f.write_str("Null"),
            Field::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Field::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Field::String(s) => f.debug_tuple("String").field(s).finish(),
            Field::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Field::List(list) => write!(f, "List(len={})", read(list).len()),
            Field::Map(map) => f
                .debug_tuple("Map")
                .field(&read(map).keys().collect::<Vec<_>>())
                .finish(),
            Field::Error(err) => write!(f, "Error({}: {})", err.name(), err.message()),
        }
    }
}

impl From<bool> for Field {
    fn from(value: bool) -> Self {
        Field::Bool(value)
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Field {
                fn from(value: $ty) -> Self {
                    Field::Number(Number::from(value))
                }
            }
        )*
    };
}

impl_from_integer!(i32, i64, u32, u64, usize);

impl From<f64> for Field {
    /// Non-finite floats have no JSON form and become [`Field::Null`].
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Field::Null, Field::Number)
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::String(value.to_string())
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Field::String(value)
    }
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        Field::Json(value)
    }
}

impl From<ErrorObject> for Field {
    fn from(value: ErrorObject) -> Self {
        Field::Error(Arc::new(value))
    }
}

impl From<Arc<ErrorObject>> for Field {
    fn from(value: Arc<ErrorObject>) -> Self {
        Field::Error(value)
    }
}

impl From<Vec<Field>> for Field {
    fn from(value: Vec<Field>) -> Self {
        Field::list(value)
    }
}

impl From<BTreeMap<String, Field>> for Field {
    fn from(value: BTreeMap<String, Field>) -> Self {
        Field::Map(Arc::new(RwLock::new(value)))
    }
}

impl<T: Into<Field>> From<Option<T>> for Field {
    fn from(value: Option<T>) -> Self {
        value.map_or(Field::Null, Into::into)
    }
}

/// An error-like value: name, message, optional stack, optional cause and
/// any number of extra fields.
///
/// Cause and extra fields may be set after the object is shared, which is
/// what makes cyclic cause chains representable.
pub struct ErrorObject {
    name: String,
    message: String,
    stack: Option<String>,
    cause: RwLock<Option<Field>>,
    fields: RwLock<BTreeMap<String, Field>>,
}

impl ErrorObject {
    /// New error with no cause.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            cause: RwLock::new(None),
            fields: RwLock::new(BTreeMap::new()),
        }
    }

    /// Set the stack trace text.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Set the cause.
    #[must_use]
    pub fn with_cause(self, cause: impl Into<Field>) -> Self {
        *write(&self.cause) = Some(cause.into());
        self
    }

    /// Add an extra field.
    #[must_use]
    pub fn with_field(self, key: impl Into<String>, value: impl Into<Field>) -> Self {
        write(&self.fields).insert(key.into(), value.into());
        self
    }

    /// Share this error so it can be referenced from a graph.
    #[must_use]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Replace the cause of a shared error.
    pub fn set_cause(&self, cause: impl Into<Field>) {
        *write(&self.cause) = Some(cause.into());
    }

    /// Add an extra field to a shared error.
    pub fn insert_field(&self, key: impl Into<String>, value: impl Into<Field>) {
        write(&self.fields).insert(key.into(), value.into());
    }

    /// Error name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Stack trace text, if captured.
    #[must_use]
    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// The cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<Field> {
        read(&self.cause).clone()
    }

    /// Snapshot of the extra fields.
    #[must_use]
    pub fn fields(&self) -> BTreeMap<String, Field> {
        read(&self.fields).clone()
    }

    /// Capture a typed error, naming it after its type.
    ///
    /// The top-level node also carries a backtrace of the capture site when
    /// backtraces are enabled (`RUST_BACKTRACE`).
    pub fn capture<E: std::error::Error + 'static>(err: &E) -> Self {
        let mut captured = Self::from_dyn(err);
        captured.name = short_type_name::<E>().to_string();
        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            captured.stack = Some(backtrace.to_string());
        }
        captured
    }

    /// Capture an error and its `source()` chain.
    ///
    /// Sources are named `Error` since their concrete types are erased. A
    /// chain whose `source()` leads back to an error already captured ends in
    /// the [`CIRCULAR`] sentinel.
    pub fn from_dyn(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut seen = HashSet::new();
        let mut chain: Vec<&(dyn std::error::Error + 'static)> = Vec::new();
        let mut circular = false;
        let mut next = Some(err);
        while let Some(current) = next {
            let id = std::ptr::from_ref(current).cast::<()>() as usize;
            if !seen.insert(id) {
                circular = true;
                break;
            }
            chain.push(current);
            next = current.source();
        }

        // Build innermost first so each node can own its cause.
        let mut cause = circular.then(|| Field::String(CIRCULAR.to_string()));
        let mut node: Option<ErrorObject> = None;
        for error in chain.into_iter().rev() {
            if let Some(inner) = node.take() {
                cause = Some(Field::from(inner));
            }
            let mut current = ErrorObject::new("Error", error.to_string());
            if let Some(cause) = cause.take() {
                current = current.with_cause(cause);
            }
            node = Some(current);
        }
        node.unwrap_or_else(|| ErrorObject::new("Error", err.to_string()))
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

impl From<&TelemetryError> for ErrorObject {
    fn from(err: &TelemetryError) -> Self {
        let mut captured = ErrorObject::from_dyn(err);
        captured.name = err.name().to_string();
        captured.with_field("code", err.code())
    }
}

impl fmt::Debug for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorObject")
            .field("name", &self.name)
            .field("message", &self.message)
            .field("has_cause", &read(&self.cause).is_some())
            .finish_non_exhaustive()
    }
}
