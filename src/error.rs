//! Error types for linkpred.

use thiserror::Error;

/// The main error type for linkpred operations.
#[derive(Debug, Error)]
pub enum LinkPredError {
    /// Candle tensor operation failed
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Malformed or unsupported metric name
    #[error("invalid metric `{name}`: {reason}")]
    Metric { name: String, reason: String },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Inconsistent graph data
    #[error("graph error: {0}")]
    Graph(String),

    /// Shape mismatch
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// Checkpoint save/load failure
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Collective communication protocol violation
    #[error("collective protocol violation: {0}")]
    Protocol(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for linkpred operations.
pub type Result<T> = std::result::Result<T, LinkPredError>;
