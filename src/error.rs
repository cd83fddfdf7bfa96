//! # Error Types
//!
//! Custom error types for Drone Bridge using `thiserror`.
//!
//! No error category terminates the scheduler loop: device errors are
//! retried lazily on the next send, storage errors abandon the current
//! tick's operation, and protocol errors drop the offending line.

use thiserror::Error;

/// Main error type for Drone Bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Device could not be reached or opened
    #[error("device connection error: {0}")]
    Connect(String),

    /// Serial I/O failure on an established connection
    #[error("serial I/O error: {0}")]
    Serial(String),

    /// Storage (SQLite) errors
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Device protocol errors (unrecognized or unparseable line)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Drone Bridge
pub type Result<T> = std::result::Result<T, BridgeError>;
