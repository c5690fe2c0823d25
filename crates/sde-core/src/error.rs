//! Error types for pipeline construction and execution.

use thiserror::Error;

/// Errors raised by the graph model, the builder, and the engine.
///
/// Record-level failures inside function bodies are *not* represented here;
/// those are [`FunctionError`]s, absorbed by the owning operator and never
/// promoted to a graph-level failure.
#[derive(Debug, Error)]
pub enum SdeError {
    /// Graph failed validation: a cycle, a dangling edge, or a structural
    /// mutation after the graph was sealed.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// An operator's function slot is empty, or a builder chain was used
    /// out of order.
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// Unrecoverable inconsistency inside the engine itself.
    #[error("fatal engine error: {0}")]
    Fatal(String),

    /// A function's `init` or `close` hook failed while the engine was
    /// opening or closing the graph.
    #[error("resource error in operator `{operator}`: {source}")]
    Resource {
        operator: String,
        #[source]
        source: anyhow::Error,
    },

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A record-level failure reported by a function's `execute`.
///
/// The operator shell traps these: the error counter is bumped, the failure
/// is logged with the operator name and function kind, the input record is
/// discarded, and the run continues with the next record.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FunctionError {
    message: String,
    #[source]
    source: Option<anyhow::Error>,
}

impl FunctionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for FunctionError {
    fn from(source: anyhow::Error) -> Self {
        Self {
            message: source.to_string(),
            source: Some(source),
        }
    }
}
