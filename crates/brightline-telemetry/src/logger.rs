//! Logger factory and logger handles.
//!
//! A [`LoggerFactory`] owns one base logger: the level, pipeline and sinks
//! built from [`LoggerOptions`]. [`Logger`] handles are cheap views on the
//! factory that add a label and metadata to every record.
//!
//! # Replacement
//!
//! Calling [`LoggerFactory::create_logger`] again swaps in a new base logger.
//! Handles look the base logger up on every call, so a call already running
//! finishes on the old configuration and later calls use the new one. The new
//! base logger is fully built before the swap; if building fails the old one
//! stays in place.
//!
//! Applications should construct a factory at startup and pass it (or handles
//! from it) to their components. The free functions [`create_logger`],
//! [`get_logger`] and [`try_get_logger`] forward to a process-wide factory for
//! code that cannot be handed one.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tracing::debug;

use crate::config::LoggerOptions;
use crate::error::{TelemetryError, TelemetryResult};
use crate::field::{ErrorObject, Field, Meta};
use crate::level::Level;
use crate::pipeline::{FormatStep, Pipeline};
use crate::record::LogRecord;
use crate::sink::{ConsoleSink, Sink, SinkConfig};

/// The built base logger.
struct Core {
    level: Level,
    pipeline: Pipeline,
    default_meta: Meta,
    sinks: Vec<Arc<dyn Sink>>,
}

impl Core {
    fn build(options: &LoggerOptions) -> TelemetryResult<Self> {
        let steps = options
            .format
            .iter()
            .map(|spec| {
                spec.build().map_err(|e| {
                    TelemetryError::configuration(format!("invalid format step {spec:?}"), e)
                })
            })
            .collect::<TelemetryResult<Vec<Arc<dyn FormatStep>>>>()?;

        let sinks = if options.sinks.is_empty() {
            vec![SinkConfig::console()]
        } else {
            options.sinks.clone()
        };
        let sinks = sinks
            .iter()
            .map(|config| {
                config.build().map_err(|e| {
                    TelemetryError::configuration(format!("failed to build sink {config:?}"), e)
                })
            })
            .collect::<TelemetryResult<Vec<_>>>()?;

        Ok(Self {
            level: options.level,
            pipeline: Pipeline::new(steps, options.encoding),
            default_meta: json_meta(&options.default_meta),
            sinks,
        })
    }

    fn default_console() -> Self {
        Self {
            level: Level::default(),
            pipeline: Pipeline::default(),
            default_meta: Meta::new(),
            sinks: vec![Arc::new(ConsoleSink::default())],
        }
    }

    fn dispatch(&self, record: LogRecord) {
        let Some(entry) = self.pipeline.run(record) else {
            return;
        };
        for sink in &self.sinks {
            if sink.level().is_none_or(|level| level.allows(entry.level())) {
                sink.log(&entry);
            }
        }
    }
}

fn json_meta(map: &serde_json::Map<String, Value>) -> Meta {
    map.iter()
        .map(|(key, value)| (key.clone(), Field::Json(value.clone())))
        .collect()
}

type Slot = Arc<RwLock<Option<Arc<Core>>>>;

/// Owns the base logger and hands out [`Logger`] handles.
///
/// Clones share the same base logger.
#[derive(Clone, Default)]
pub struct LoggerFactory {
    slot: Slot,
}

impl LoggerFactory {
    /// Uninitialized factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Option<Arc<Core>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a base logger has been installed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.current().is_some()
    }

    /// Build a base logger from `options` and install it.
    ///
    /// Returns an unlabeled handle on the new base logger.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Configuration`] if a format step or sink
    /// cannot be built. The previously installed base logger, if any, is left
    /// untouched.
    pub fn create_logger(&self, options: &LoggerOptions) -> TelemetryResult<Logger> {
        let core = Arc::new(Core::build(options)?);
        let sinks = core.sinks.len();
        let replaced = self
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(core)
            .is_some();

        if replaced {
            debug!(level = %options.level, sinks, "Replaced base logger");
        } else {
            debug!(level = %options.level, sinks, "Installed base logger");
        }
        Ok(self.handle(None, Meta::new()))
    }

    /// Handle labeled `label`.
    ///
    /// If no base logger exists yet, a default one (info level, console sink)
    /// is installed first.
    #[must_use]
    pub fn get_logger(&self, label: impl Into<String>) -> Logger {
        self.get_logger_with(label, Meta::new())
    }

    /// Handle labeled `label` that adds `meta` to every record.
    ///
    /// Installs a default base logger if none exists, like [`Self::get_logger`].
    #[must_use]
    pub fn get_logger_with(&self, label: impl Into<String>, meta: Meta) -> Logger {
        self.ensure_initialized();
        self.handle(Some(label.into()), meta)
    }

    /// Handle labeled `label`, without installing a default base logger.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::NotInitialized`] if no base logger exists.
    pub fn try_get_logger(&self, label: impl Into<String>) -> TelemetryResult<Logger> {
        if !self.is_initialized() {
            return Err(TelemetryError::NotInitialized);
        }
        Ok(self.handle(Some(label.into()), Meta::new()))
    }

    fn ensure_initialized(&self) {
        if self.is_initialized() {
            return;
        }
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(Arc::new(Core::default_console()));
            debug!("Installed default base logger");
        }
    }

    fn handle(&self, label: Option<String>, meta: Meta) -> Logger {
        Logger {
            slot: Arc::clone(&self.slot),
            label: label.map(Arc::from),
            meta: Arc::new(meta),
        }
    }
}

impl fmt::Debug for LoggerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerFactory")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// A labeled view on a factory's base logger.
///
/// Handles do not own sinks; cloning one is cheap.
#[derive(Clone)]
pub struct Logger {
    slot: Slot,
    label: Option<Arc<str>>,
    meta: Arc<Meta>,
}

impl Logger {
    /// Label attached to every record.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Metadata attached to every record.
    #[must_use]
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Handle with the same label and `meta` merged over this one's.
    #[must_use]
    pub fn child(&self, meta: Meta) -> Self {
        let mut merged = (*self.meta).clone();
        merged.extend(meta);
        Self {
            slot: Arc::clone(&self.slot),
            label: self.label.clone(),
            meta: Arc::new(merged),
        }
    }

    /// Handle with the same metadata and a different label.
    #[must_use]
    pub fn with_label(&self, label: impl Into<String>) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            label: Some(Arc::from(label.into())),
            meta: Arc::clone(&self.meta),
        }
    }

    fn core(&self) -> Option<Arc<Core>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a record at `level` would be logged.
    #[must_use]
    pub fn is_enabled(&self, level: Level) -> bool {
        self.core().is_some_and(|core| core.level.allows(level))
    }

    /// Log a record built by the caller.
    ///
    /// Metadata precedence, lowest first: diagnostic context, the factory's
    /// default metadata, this handle's metadata, the record's own metadata.
    /// The handle's label is used unless the record already has one.
    pub fn emit(&self, mut record: LogRecord) {
        let Some(core) = self.core() else {
            return;
        };
        if !core.level.allows(record.level) {
            return;
        }

        let mut meta: BTreeMap<String, Field> = core.default_meta.clone();
        meta.extend(self.meta.iter().map(|(k, v)| (k.clone(), v.clone())));
        meta.append(&mut record.meta);
        record.meta = meta;
        if record.label.is_none() {
            record.label = self.label.as_deref().map(str::to_string);
        }

        core.dispatch(record);
    }

    /// Log a message.
    pub fn log(&self, level: Level, message: impl Into<String>) {
        self.emit(LogRecord::new(level, message));
    }

    /// Log a message with metadata.
    pub fn log_with(&self, level: Level, message: impl Into<String>, meta: Meta) {
        let mut record = LogRecord::new(level, message);
        record.meta = meta;
        self.emit(record);
    }

    /// Log a message with an error and its cause chain.
    pub fn log_error(
        &self,
        level: Level,
        message: impl Into<String>,
        error: &(dyn std::error::Error + 'static),
    ) {
        self.emit(LogRecord::new(level, message).with_error(Field::error(error)));
    }

    /// Log a message with an error-like value.
    pub fn log_error_object(&self, level: Level, message: impl Into<String>, error: ErrorObject) {
        self.emit(LogRecord::new(level, message).with_error(error));
    }

    /// Log at [`Level::Error`].
    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }

    /// Log at [`Level::Warn`].
    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::Warn, message);
    }

    /// Log at [`Level::Info`].
    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    /// Log at [`Level::Http`].
    pub fn http(&self, message: impl Into<String>) {
        self.log(Level::Http, message);
    }

    /// Log at [`Level::Verbose`].
    pub fn verbose(&self, message: impl Into<String>) {
        self.log(Level::Verbose, message);
    }

    /// Log at [`Level::Debug`].
    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }

    /// Log at [`Level::Trace`].
    pub fn trace(&self, message: impl Into<String>) {
        self.log(Level::Trace, message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("label", &self.label)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

static GLOBAL: LazyLock<LoggerFactory> = LazyLock::new(LoggerFactory::new);

/// The process-wide factory behind the free functions.
#[must_use]
pub fn global() -> &'static LoggerFactory {
    &GLOBAL
}

/// [`LoggerFactory::create_logger`] on the process-wide factory.
///
/// # Errors
///
/// Returns [`TelemetryError::Configuration`] if a format step or sink cannot
/// be built; the installed base logger is left untouched.
pub fn create_logger(options: &LoggerOptions) -> TelemetryResult<Logger> {
    GLOBAL.create_logger(options)
}

/// [`LoggerFactory::get_logger`] on the process-wide factory.
#[must_use]
pub fn get_logger(label: impl Into<String>) -> Logger {
    GLOBAL.get_logger(label)
}

/// [`LoggerFactory::try_get_logger`] on the process-wide factory.
///
/// # Errors
///
/// Returns [`TelemetryError::NotInitialized`] if no base logger exists.
pub fn try_get_logger(label: impl Into<String>) -> TelemetryResult<Logger> {
    GLOBAL.try_get_logger(label)
}
