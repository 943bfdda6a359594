//! Structured error handling with machine-readable codes
//!
//! Internal plumbing uses `anyhow::Result`; the public engine surface maps
//! everything into [`ConsolidationError`] so hosts can branch on error codes
//! instead of parsing messages.

use std::fmt;

/// Engine error types with proper categorization
#[derive(Debug)]
pub enum ConsolidationError {
    /// Invalid configuration caught at construction, never at stage runtime
    Configuration { field: String, reason: String },

    /// Propagated from the storage collaborator; aborts the current stage's
    /// writeback and leaves prior stages' persisted results intact
    Storage { stage: String, details: String },

    /// Archive serialization/write failure during forgetting; the affected
    /// memory is retained, never deleted
    Serialization(String),

    /// Run cancelled at the checkpoint before the forgetting stage
    Cancelled,

    /// Generic wrapper for unexpected internal errors
    Internal(anyhow::Error),
}

impl ConsolidationError {
    /// Create a configuration error for a named field
    pub fn config(field: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a storage error with stage context
    pub fn storage(stage: &str, details: impl Into<String>) -> Self {
        Self::Storage {
            stage: stage.to_string(),
            details: details.into(),
        }
    }

    /// Get error code for host identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Cancelled => "RUN_CANCELLED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get detailed error message
    pub fn message(&self) -> String {
        match self {
            Self::Configuration { field, reason } => {
                format!("Invalid configuration for '{field}': {reason}")
            }
            Self::Storage { stage, details } => {
                format!("Storage failure during {stage} stage: {details}")
            }
            Self::Serialization(msg) => format!("Archive serialization error: {msg}"),
            Self::Cancelled => "Consolidation run cancelled before forgetting".to_string(),
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }
}

impl fmt::Display for ConsolidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ConsolidationError {}

impl From<anyhow::Error> for ConsolidationError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

/// Type alias for Results using ConsolidationError
pub type Result<T> = std::result::Result<T, ConsolidationError>;
