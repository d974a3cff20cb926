//! Error types for the garnishment engine.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur during engine operation.
///
/// Case-scoped variants (`InvalidInput`, `UnsupportedGarnishmentType`,
/// `RuleNotFound`) never abort a batch; the orchestrator folds them into the
/// affected case's result.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or negative monetary field, unknown deduction name, etc.
    #[error("Invalid input for {field}: {message}")]
    InvalidInput { field: String, message: String },

    /// Garnishment type tag outside the known set
    #[error("Unsupported garnishment type: {0}")]
    UnsupportedGarnishmentType(String),

    /// No statutory rule covers the type in the jurisdiction
    #[error("No statutory rule for {garnishment_type} in {jurisdiction}")]
    RuleNotFound {
        garnishment_type: String,
        jurisdiction: String,
    },

    /// Rule table failed validation at load time
    #[error("Invalid rule table: {0}")]
    InvalidRuleTable(String),

    /// The caller aborted the batch
    #[error("Batch {batch_id} was cancelled")]
    Cancelled { batch_id: String },

    /// The batch deadline elapsed before every case finished
    #[error("Batch {batch_id} timed out")]
    TimedOut { batch_id: String },

    /// Failed to open or read an input file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Missing input file argument
    #[error("Missing input file argument. Usage: garnishment-engine <cases.json> [rules.json] [--csv]")]
    MissingArgument,
}

impl EngineError {
    /// Shorthand for an [`EngineError::InvalidInput`].
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }
}
