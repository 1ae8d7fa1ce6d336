//! Error types for the profiler.
//!
//! Library crates use [`ProfilerError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! The variants follow the pipeline's failure-domain rules: transient
//! failures are retried then treated as an absent source, malformed
//! collaborator output falls back or leaves fields absent, cache corruption
//! degrades to an empty cache, data-integrity violations are surfaced to the
//! caller, and only configuration errors may abort a run before it starts.

use std::path::PathBuf;

/// Top-level error type for all profiler operations.
#[derive(Debug, thiserror::Error)]
pub enum ProfilerError {
    /// Configuration loading or validation error. The only class that
    /// aborts the whole run, and only before any enterprise is processed.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/timeout/rate-limit failure; retried with backoff, then the
    /// contributing source is treated as absent for that enterprise.
    #[error("transient fetch error: {message}")]
    Transient { message: String },

    /// A collaborator or text-generation step returned unparsable output.
    /// Never propagated as a crash.
    #[error("malformed response: {message}")]
    Malformed { message: String },

    /// Backing cache file unreadable; the store degrades to empty.
    #[error("cache corruption: {0}")]
    CacheCorruption(String),

    /// An internal invariant was violated (e.g. a classification code absent
    /// from the section mapping). Indicates a configuration/data defect.
    #[error("data integrity error: {message}")]
    DataIntegrity { message: String },

    /// Cache store persistence error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Tabular output emission error.
    #[error("output error: {0}")]
    Output(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ProfilerError>;

impl ProfilerError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a transient fetch error from any displayable message.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient {
            message: msg.into(),
        }
    }

    /// Create a malformed-response error from any displayable message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed {
            message: msg.into(),
        }
    }

    /// Create a data-integrity error from any displayable message.
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::DataIntegrity {
            message: msg.into(),
        }
    }

    /// Create a tabular-output error from any displayable message.
    pub fn output(msg: impl Into<String>) -> Self {
        Self::Output(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ProfilerError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = ProfilerError::integrity("code 99.99 not in section mapping");
        assert!(err.to_string().contains("99.99"));
    }

    #[test]
    fn transient_classification() {
        assert!(ProfilerError::transient("timeout").is_transient());
        assert!(!ProfilerError::malformed("bad json").is_transient());
        assert!(!ProfilerError::CacheCorruption("truncated".into()).is_transient());
    }
}
