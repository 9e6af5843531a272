//! Error types for the session memory subsystem.

use thiserror::Error;

/// Result type alias using the memory error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the session memory subsystem.
#[derive(Error, Debug)]
pub enum Error {
    /// The durable layer could not be reached, timed out, or failed mid-operation.
    #[error("Store unavailable during {operation}: {reason}")]
    StoreUnavailable {
        operation: &'static str,
        reason: String,
        /// Busy/locked faults that an immediate retry may clear
        transient: bool,
    },

    /// A write collided with state it did not expect (index already taken,
    /// summary coverage moving backwards).
    #[error("Conflicting write during {operation}: {reason}")]
    Conflict {
        operation: &'static str,
        reason: String,
    },

    /// The external summarizer errored or returned empty text.
    #[error("Summarization failed: {0}")]
    SummarizationFailed(String),

    /// Invalid manager configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed metadata path, or a write through a non-map value.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// A metadata update that does not fit the document shape.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a non-transient `StoreUnavailable`.
    pub fn store_unavailable(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            operation,
            reason: reason.into(),
            transient: false,
        }
    }

    /// Check if this is a store availability error.
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Check if an immediate retry may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable { transient: true, .. })
    }

    /// Check if this is a summarization failure.
    pub const fn is_summarization_failed(&self) -> bool {
        matches!(self, Self::SummarizationFailed(_))
    }
}
