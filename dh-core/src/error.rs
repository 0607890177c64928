//! Error types for the aggregation core.

use thiserror::Error;

/// Result type alias for aggregation operations.
pub type Result<T> = std::result::Result<T, AggregationError>;

/// Opaque failure reported by an external capability (aggregation engine or
/// group domain).
///
/// Cloneable so a single failed computation can be handed to every caller
/// that joined it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors that can occur while building, running or reshaping a report.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    /// A grouping or series dimension outside the supported set.
    #[error("Invalid dimension '{value}' for {dimension}")]
    InvalidDimension {
        /// Which request field carried the value.
        dimension: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A required request parameter was not supplied.
    #[error("Missing parameter: {0}")]
    MissingParameter(&'static str),

    /// The engine returned rows that break the pipeline's output contract.
    #[error("Malformed aggregation result: {0}")]
    MalformedAggregationResult(String),

    /// The report method is not one of the known report kinds.
    #[error("Unknown aggregation method: {0}")]
    UnknownMethod(String),

    /// Failure from the aggregation engine or group domain.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl AggregationError {
    pub(crate) fn invalid_dimension(dimension: &'static str, value: impl Into<String>) -> Self {
        AggregationError::InvalidDimension {
            dimension,
            value: value.into(),
        }
    }

    /// Stable type name used in error envelopes.
    pub fn type_name(&self) -> &'static str {
        match self {
            AggregationError::InvalidDimension { .. } => "InvalidDimension",
            AggregationError::MissingParameter(_) => "MissingParameter",
            AggregationError::MalformedAggregationResult(_) => "MalformedAggregationResult",
            AggregationError::UnknownMethod(_) => "UnknownMethod",
            AggregationError::Engine(_) => "EngineError",
        }
    }
}
