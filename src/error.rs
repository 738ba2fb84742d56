//! Error types for Ward Trace

use thiserror::Error;

/// Errors that can occur while building intervals or occupancy histories
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Malformed timestamp {input:?}: {reason}")]
    Timestamp { input: String, reason: String },

    #[error("Structural violation: {0}")]
    StructuralViolation(String),

    #[error("Shift {0} is excluded from production runs")]
    ExcludedShift(usize),

    #[error("Unknown shift: {0}")]
    UnknownShift(usize),

    #[error("Not a registered door anchor: {0}")]
    NotADoor(String),

    #[error("No contact intervals to process")]
    NoIntervals,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TraceError {
    /// Build a timestamp error for the given input text
    pub fn timestamp(input: &str, reason: impl Into<String>) -> Self {
        TraceError::Timestamp {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error invalidates a whole shift (as opposed to bad input or I/O)
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            TraceError::StructuralViolation(_) | TraceError::NoIntervals
        )
    }
}
