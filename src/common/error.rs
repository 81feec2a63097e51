//! Error types for the harness
//!
//! These cover conditions that abort a scenario or the whole run. Assertion
//! results never travel through this type; they are recorded as
//! [`Outcome`](crate::report::Outcome) values in the result writer.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Scenario Loading Errors ===
    #[error("File {file} is missing in test '{scenario}'")]
    MissingFile { scenario: String, file: String },

    #[error("Don't know what to do with file '{file}' in test '{scenario}'")]
    UnknownFile { scenario: String, file: String },

    #[error("Invalid address '{0}', expected <address>/<prefix length>")]
    InvalidAddress(String),

    #[error("Unknown tests: {}", .0.join(", "))]
    UnknownScenarios(Vec<String>),

    // === Environment Errors ===
    #[error("Platform operation '{operation}' failed: {message}")]
    Platform { operation: String, message: String },

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Aborted by interrupt")]
    Interrupted,

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write report '{path}': {message}")]
    Report { path: String, message: String },
}

impl Error {
    /// Create a platform error for a failed namespace/link operation
    pub fn platform(operation: &str, message: impl Into<String>) -> Self {
        Self::Platform {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Create a spawn error for a program that could not be started
    pub fn spawn(program: &str, source: io::Error) -> Self {
        Self::Spawn {
            program: program.to_string(),
            source,
        }
    }

    /// Create a file read error
    pub fn file_read(path: &std::path::Path, error: impl ToString) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }
}
