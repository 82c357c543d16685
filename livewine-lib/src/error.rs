//! Error types for livewine

use thiserror::Error;

/// Livewine result type
pub type Result<T> = std::result::Result<T, InstallerError>;

/// Main error type for installer operations
#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Required tool missing: {0}")]
    DependencyMissing(String),

    #[error("Step {step} failed: {message}")]
    StepFailed {
        step: String,
        critical: bool,
        message: String,
    },

    #[error("{what} timed out after {secs}s")]
    TimedOut { what: String, secs: u64 },

    #[error("Cancelled by operator")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: String, got: String },

    #[error("Command execution failed: {command} - {error}")]
    CommandExecution { command: String, error: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl InstallerError {
    /// Errors that abort a run even when raised by an optional step
    pub fn aborts_run(&self) -> bool {
        matches!(self, InstallerError::Cancelled)
    }
}
