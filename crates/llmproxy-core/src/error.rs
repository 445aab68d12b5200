//! Error types for the proxy supervisor.
//!
//! Every failure here is recoverable: the supervisor logs a human-readable
//! line, stays (or returns to) the not-running state and hands the error back
//! to the caller. Nothing is retried automatically.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// No usable executable was found in direct mode.
    #[error("Could not find '{executable}' executable. Please install it or specify the path manually.")]
    ResolutionFailed { executable: String },

    /// The OS refused to start the process.
    #[error("Failed to spawn {program:?}: {source}")]
    SpawnFailed {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Delivering a termination signal failed.
    #[error("Failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

impl From<std::io::Error> for SupervisorError {
    fn from(err: std::io::Error) -> Self {
        SupervisorError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SupervisorError {
    fn from(err: serde_json::Error) -> Self {
        SupervisorError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl SupervisorError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        SupervisorError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Whether this error ended a `start` attempt before a process existed.
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            SupervisorError::ResolutionFailed { .. } | SupervisorError::SpawnFailed { .. }
        )
    }
}
