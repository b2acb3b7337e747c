//! Error types for the build engine.

use std::path::PathBuf;

/// Result type alias for build engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by build steps.
///
/// Steps are written by external collaborators (language builders,
/// integrations) and may fail with any error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in the build engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Connectivity Errors
    // =========================================================================
    /// Daemon or socket unreachable.
    #[error("failed to connect to {backend} at {endpoint}: {reason}")]
    Connection {
        backend: String,
        endpoint: String,
        reason: String,
    },

    /// Socket discovery failed.
    #[error("failed to discover {backend} socket: {reason}")]
    Discovery { backend: String, reason: String },

    /// No backend registered under the requested name.
    #[error("unknown container runtime '{name}' (available: {available})")]
    UnknownBackend { name: String, available: String },

    // =========================================================================
    // Not-Found Errors
    // =========================================================================
    /// Container not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Image not found.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    // =========================================================================
    // Malformed Input Errors
    // =========================================================================
    /// Environment entry without `=`.
    #[error("invalid environment entry '{entry}': expected KEY=VALUE")]
    InvalidEnv { entry: String },

    /// Registry credential blob could not be decoded.
    #[error("invalid registry credentials: {0}")]
    InvalidCredentials(String),

    /// Platform string could not be parsed.
    #[error("invalid platform '{value}': {reason}")]
    InvalidPlatform { value: String, reason: String },

    /// Failed to parse image reference.
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidImageReference { reference: String, reason: String },

    /// Mount option neither backend can honor for this mount kind.
    #[error("invalid mount option '{option}' for {target}: {reason}")]
    InvalidMount {
        target: String,
        option: String,
        reason: String,
    },

    /// Readiness probe endpoint is not a usable URL.
    #[error("invalid probe endpoint '{endpoint}': {reason}")]
    InvalidProbeEndpoint { endpoint: String, reason: String },

    /// Path traversal attempt detected in tar archive.
    #[error("path traversal detected in archive: {path}")]
    PathTraversal { path: String },

    /// Archive entry was expected to be a regular file.
    #[error("archive entry '{path}' is not a regular file")]
    NotRegularFile { path: String },

    /// Archive could not be built or read.
    #[error("archive error: {0}")]
    Archive(String),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// Error reported by a backend client, message kept verbatim.
    #[error("{backend}: {message}")]
    Backend { backend: String, message: String },

    /// Non-success HTTP status from a REST endpoint.
    #[error("{backend} API returned {status}: {message}")]
    Api {
        backend: String,
        status: u16,
        message: String,
    },

    /// Operation not supported by this backend.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    // =========================================================================
    // Build Errors
    // =========================================================================
    /// Image build failed.
    #[error("failed to build image '{image}': {reason}")]
    BuildFailed { image: String, reason: String },

    /// One platform of a multi-arch assembly failed.
    #[error("multi-arch build failed for platform {platform}: {reason}")]
    MultiArchBuild { platform: String, reason: String },

    /// A build step failed.
    #[error("step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: BoxError,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file could not be loaded.
    #[error("invalid configuration at {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // =========================================================================
    // Timeout Errors
    // =========================================================================
    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Builds a [`Error::Backend`] keeping the client's message unmodified.
    pub fn backend(backend: &str, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            backend: backend.to_string(),
            message: err.to_string(),
        }
    }

    /// Returns true for the not-found family of errors.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ContainerNotFound(_) | Self::ImageNotFound(_) => true,
            Self::Api { status, .. } => *status == 404,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
