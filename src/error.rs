//! Error types for the build engine.

use std::path::PathBuf;

/// Result type alias for build operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building an image.
///
/// The variants follow the failure taxonomy of the engine: configuration
/// problems are reported before any filesystem mutation, context problems
/// abort the current stage, and everything else bubbles up to
/// [`do_build`](crate::builder::do_build) which aborts the whole build.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid build configuration (unknown instruction, bad flag, bad mode).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Dockerfile could not be parsed.
    #[error("failed to parse Dockerfile: {reason}")]
    Parse { reason: String },

    // =========================================================================
    // Build Context Errors
    // =========================================================================
    /// A COPY/ADD source is missing or the destination is ambiguous.
    #[error("invalid build context: {0}")]
    Context(String),

    /// A source pattern matched nothing and contained no wildcard.
    #[error("source '{src}' does not exist in the build context")]
    MissingSource { src: String },

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// Network failure talking to a registry after retries were exhausted.
    #[error("registry request for '{reference}' failed: {reason}")]
    Network { reference: String, reason: String },

    /// The registry rejected our credentials.
    #[error("authentication against registry '{registry}' failed: {reason}")]
    Auth { registry: String, reason: String },

    /// A pulled blob did not match its expected digest.
    #[error("digest mismatch for {digest}: got {actual}")]
    Integrity { digest: String, actual: String },

    // =========================================================================
    // Execution Errors
    // =========================================================================
    /// A RUN command exited non-zero.
    #[error("command '{command}' exited with status {status}")]
    Exec { command: String, status: i32 },

    /// A RUN command could not be spawned.
    #[error("failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    /// USER/RUN referenced a user or group absent from the image.
    #[error("user lookup for '{user}' failed: {reason}")]
    UserLookup { user: String, reason: String },

    // =========================================================================
    // Filesystem Errors
    // =========================================================================
    /// An I/O failure scoped to a specific path.
    #[error("filesystem operation on {path} failed: {reason}")]
    Fs { path: PathBuf, reason: String },

    /// A tar entry tried to escape the extraction root.
    #[error("path traversal detected in layer entry: {path}")]
    PathTraversal { path: String },

    // =========================================================================
    // Cancellation
    // =========================================================================
    /// The host asked the build to stop; no further instructions are run.
    #[error("build cancelled")]
    Cancelled,

    // =========================================================================
    // Passthrough
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Wraps an I/O error with the path it occurred on.
    pub fn fs(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Error::Fs {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}
