//! Routes `tracing` events into a [`Logger`].

use serde::{Deserialize, Serialize};
use tracing::field::{Field as TracingField, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    EnvFilter,
    layer::{Context, Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::error::{TelemetryError, TelemetryResult};
use crate::field::{Field, Meta};
use crate::level::Level;
use crate::logger::Logger;
use crate::record::{ERROR_KEY, LogRecord, MESSAGE_KEY};

/// Events from this crate are not routed, so a sink reporting a write failure
/// cannot feed back into the pipeline.
const OWN_TARGET: &str = "brightline_telemetry";

/// Helper to convert init errors to our error type.
fn init_err<E: std::fmt::Display>(e: E) -> TelemetryError {
    TelemetryError::Init(e.to_string())
}

/// A [`Layer`] that turns each event into a log record.
///
/// The event target becomes the label, the `message` field the message and
/// every other field metadata. An error recorded under `error` becomes the
/// record's error payload with its cause chain.
#[derive(Debug, Clone)]
pub struct PipelineLayer {
    logger: Logger,
}

impl PipelineLayer {
    /// Layer that logs through `logger`.
    #[must_use]
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

impl<S: Subscriber> Layer<S> for PipelineLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with(OWN_TARGET) {
            return;
        }
        let level = Level::from(*metadata.level());
        if !self.logger.is_enabled(level) {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let mut record = LogRecord::new(level, visitor.message.unwrap_or_default())
            .with_label(metadata.target());
        record.meta = visitor.meta;
        record.error = visitor.error;
        self.logger.emit(record);
    }
}

#[derive(Default)]
struct EventVisitor {
    message: Option<String>,
    meta: Meta,
    error: Option<Field>,
}

impl EventVisitor {
    fn insert(&mut self, field: &TracingField, value: Field) {
        self.meta.insert(field.name().to_string(), value);
    }
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &TracingField, value: &dyn std::fmt::Debug) {
        let text = format!("{value:?}");
        if field.name() == MESSAGE_KEY {
            self.message = Some(text);
        } else {
            self.insert(field, Field::from(text));
        }
    }

    fn record_str(&mut self, field: &TracingField, value: &str) {
        if field.name() == MESSAGE_KEY {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, Field::from(value));
        }
    }

    fn record_i64(&mut self, field: &TracingField, value: i64) {
        self.insert(field, Field::from(value));
    }

    fn record_u64(&mut self, field: &TracingField, value: u64) {
        self.insert(field, Field::from(value));
    }

    fn record_f64(&mut self, field: &TracingField, value: f64) {
        self.insert(field, Field::from(value));
    }

    fn record_bool(&mut self, field: &TracingField, value: bool) {
        self.insert(field, Field::from(value));
    }

    fn record_error(
        &mut self,
        field: &TracingField,
        value: &(dyn std::error::Error + 'static),
    ) {
        let captured = Field::error(value);
        if field.name() == ERROR_KEY && self.error.is_none() {
            self.error = Some(captured);
        } else {
            self.insert(field, captured);
        }
    }
}

/// Filter settings for [`install_tracing`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Default filter (e.g., "info", "debug", "trace").
    #[serde(default = "default_level")]
    pub level: String,
    /// Directive overrides (e.g., `hyper=warn`).
    #[serde(default)]
    pub directives: Vec<String>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            directives: Vec::new(),
        }
    }
}

impl TracingConfig {
    /// Config with the given default filter.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// Config whose default filter admits `level`.
    ///
    /// `http` and `verbose` have no `tracing` counterpart and map to `info`.
    #[must_use]
    pub fn for_level(level: Level) -> Self {
        Self::new(level.as_directive())
    }

    /// Add a directive override.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Build the env filter from config.
    fn build_filter(&self) -> TelemetryResult<EnvFilter> {
        let mut filter = EnvFilter::try_new(&self.level)
            .map_err(|e| TelemetryError::configuration("invalid tracing level", e))?;

        for directive in &self.directives {
            filter = filter.add_directive(directive.parse().map_err(
                |e: tracing_subscriber::filter::ParseError| {
                    TelemetryError::configuration(format!("invalid directive {directive:?}"), e)
                },
            )?);
        }

        Ok(filter)
    }
}

/// Install a global `tracing` subscriber that logs through `logger`.
///
/// # Errors
///
/// Returns a configuration error if a directive is invalid, or an
/// initialization error if a global subscriber is already set.
pub fn install_tracing(config: &TracingConfig, logger: Logger) -> TelemetryResult<()> {
    let filter = config.build_filter()?;
    tracing_subscriber::registry()
        .with(filter)
        .with(PipelineLayer::new(logger))
        .try_init()
        .map_err(init_err)
}
