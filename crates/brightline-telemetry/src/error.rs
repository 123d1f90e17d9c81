//! Telemetry error types.

use thiserror::Error;

/// Boxed error retained as the cause of a telemetry failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur with telemetry operations.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A pipeline step or sink could not be constructed.
    #[error("Configuration error: {message}")]
    Configuration {
        /// What was being configured when construction failed.
        message: String,
        /// The originating construction error.
        #[source]
        source: BoxError,
    },

    /// A logger was requested before any base logger was installed.
    #[error("Logger factory is not initialized")]
    NotInitialized,

    /// A value could not be serialized.
    ///
    /// The error-chain serializer is total, so the pipeline never raises this.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The global tracing subscriber could not be installed.
    #[error("Initialization error: {0}")]
    Init(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TelemetryError {
    /// Numeric code of [`TelemetryError::Configuration`].
    pub const CONFIGURATION: u32 = 1001;
    /// Numeric code of [`TelemetryError::NotInitialized`].
    pub const NOT_INITIALIZED: u32 = 1002;
    /// Numeric code of [`TelemetryError::Serialization`].
    pub const SERIALIZATION: u32 = 1003;
    /// Numeric code of [`TelemetryError::Init`].
    pub const INIT: u32 = 1004;
    /// Numeric code of [`TelemetryError::Io`].
    pub const IO: u32 = 1005;

    /// Wrap a construction failure, keeping it as the cause.
    pub fn configuration(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Numeric classification of this error.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::Configuration { .. } => Self::CONFIGURATION,
            Self::NotInitialized => Self::NOT_INITIALIZED,
            Self::Serialization(_) => Self::SERIALIZATION,
            Self::Init(_) => Self::INIT,
            Self::Io(_) => Self::IO,
        }
    }

    /// Stable error name used when the error is serialized into a log record.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "ConfigurationError",
            Self::NotInitialized => "NotInitializedError",
            Self::Serialization(_) => "SerializationError",
            Self::Init(_) => "InitializationError",
            Self::Io(_) => "IoError",
        }
    }
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
