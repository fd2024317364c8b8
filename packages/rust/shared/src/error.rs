//! Error types for ContextMaker.
//!
//! Library crates use [`ContextMakerError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all ContextMaker operations.
#[derive(Debug, thiserror::Error)]
pub enum ContextMakerError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The external documentation build tool could not be run or failed.
    #[error("build error: {0}")]
    Build(String),

    /// Notebook conversion error.
    #[error("notebook error: {0}")]
    Notebook(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (missing paths, bad names, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-text conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ContextMakerError>;

impl ContextMakerError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
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
