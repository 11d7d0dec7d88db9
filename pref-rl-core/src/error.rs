//! Error types for preference-based reward learning

use thiserror::Error;

/// Core error type for preference learning operations
#[derive(Error, Debug)]
pub enum PrefRlError {
    /// Bad shapes, values, enum options, space mismatches or empty collections.
    /// Raised before any state is mutated.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A stateful precondition was violated (e.g. an undrained rollout buffer)
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// More data was requested than is available
    #[error("Capacity error: requested {requested} steps but only {available} available")]
    Capacity {
        /// Number of steps requested
        requested: usize,
        /// Number of steps actually available
        available: usize,
    },

    /// A component was wired to an incompatible reward-model shape
    #[error("{expected} expected by {context}, found {found}")]
    WrongModelType {
        /// The model shape the component requires
        expected: &'static str,
        /// The component that rejected the model
        context: &'static str,
        /// The model actually supplied
        found: &'static str,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for preference learning operations
pub type Result<T> = std::result::Result<T, PrefRlError>;
