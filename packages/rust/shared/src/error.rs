//! Error types for the sourcing engine.
//!
//! Library crates use [`SourcingError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Per-stage enrichment failures are not represented here:
//! they are plain values attached to the entity's processing record.

use std::path::PathBuf;

/// Top-level error type for all sourcing operations.
#[derive(Debug, thiserror::Error)]
pub enum SourcingError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to an external provider.
    #[error("network error: {0}")]
    Network(String),

    /// A provider answered, but with something we cannot use.
    #[error("provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    /// HTML/JSON parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad stage plan, unknown status, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SourcingError>;

impl SourcingError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a provider error tagged with the provider name.
    pub fn provider(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
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
        let err = SourcingError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = SourcingError::provider("serper", "HTTP 429");
        assert_eq!(err.to_string(), "provider error (serper): HTTP 429");

        let err = SourcingError::Storage("disk full".into());
        assert_eq!(err.to_string(), "storage error: disk full");
    }
}
