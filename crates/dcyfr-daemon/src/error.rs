// crates/dcyfr-daemon/src/error.rs
// Standardized error types for the guardian daemon

use thiserror::Error;

/// Main error type for the guardian library
#[derive(Error, Debug)]
pub enum GuardianError {
    #[error("already-running: daemon already running with pid {pid}")]
    AlreadyRunning { pid: u32 },

    #[error("unknown-scanner: no scanner '{id}' registered (known: {known})")]
    UnknownScanner { id: String, known: String },

    #[error("duplicate-id: scanner '{0}' is already registered")]
    DuplicateScanner(String),

    #[error("scanner '{0}' does not support fixing")]
    FixUnsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using GuardianError
pub type Result<T> = std::result::Result<T, GuardianError>;

impl From<String> for GuardianError {
    fn from(s: String) -> Self {
        GuardianError::Other(s)
    }
}

impl From<GuardianError> for String {
    fn from(err: GuardianError) -> Self {
        err.to_string()
    }
}
