//! Error types for actorlens.
//!
//! Library crates use [`ActorLensError`] via `thiserror`.
//! The CLI app wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all actorlens operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorLensError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during catalog fetch.
    #[error("network error: {0}")]
    Network(String),

    /// Taxonomy bundle missing, malformed, or empty. Always fatal for a run.
    #[error("taxonomy error: {message}")]
    Taxonomy { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Reasoning service error (transport, API, or response parsing).
    #[error("inference error: {0}")]
    Inference(String),

    /// Data validation error (malformed source record, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ActorLensError>;

impl ActorLensError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a taxonomy error from any displayable message.
    pub fn taxonomy(msg: impl Into<String>) -> Self {
        Self::Taxonomy {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ActorLensError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = ActorLensError::taxonomy("bundle is empty");
        assert!(err.to_string().contains("bundle is empty"));

        let err = ActorLensError::validation("actor record has no name");
        assert!(err.to_string().contains("no name"));
    }
}
