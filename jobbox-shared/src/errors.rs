//! Error types shared across the jobbox crates.

use thiserror::Error;

/// Result alias used throughout jobbox.
pub type JobboxResult<T> = Result<T, JobboxError>;

/// Errors surfaced by the sandbox child runtime.
///
/// `Capability` and `PathEscape` are raised synchronously into handler
/// code, which may catch them; the remaining variants are runtime errors
/// that either fail a single round-trip (`Request`) or are fatal to the
/// process (`Protocol`, `Bundle`).
#[derive(Error, Debug)]
pub enum JobboxError {
    /// A guarded primitive was called without the required capability.
    #[error("{0}")]
    Capability(String),

    /// A path resolved outside both the bundle root and the host root.
    #[error("{0}")]
    PathEscape(String),

    /// The start payload or the surrounding handshake is unusable.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The bundle entry could not be validated or resolved to a handler.
    #[error("{0}")]
    Bundle(String),

    /// An update/resolve-secret round-trip failed; carries the parent's
    /// error string or a per-kind default.
    #[error("{0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobboxError {
    /// Denial message for filesystem primitives, shared by every guarded
    /// operation including descriptor-form calls.
    pub fn fs_capability() -> Self {
        JobboxError::Capability(
            "File system access requires declaring the \"fs\" capability".to_string(),
        )
    }

    /// Denial message for network primitives.
    pub fn network_capability() -> Self {
        JobboxError::Capability(
            "Network access requires declaring the \"network\" capability".to_string(),
        )
    }

    /// Rejection for a path that escapes the permitted roots.
    pub fn path_escape() -> Self {
        JobboxError::PathEscape(
            "Attempted to access path outside of bundle directory".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_capability_names_the_capability() {
        let err = JobboxError::fs_capability();
        assert!(err.to_string().contains("\"fs\" capability"));
    }

    #[test]
    fn network_capability_names_the_capability() {
        let err = JobboxError::network_capability();
        assert!(err.to_string().contains("\"network\" capability"));
    }

    #[test]
    fn path_escape_mentions_bundle() {
        let err = JobboxError::path_escape();
        assert!(err.to_string().contains("outside of bundle directory"));
    }
}
