//! Unified error type for all ShiftClaw crates.

use thiserror::Error;

/// Errors raised by ShiftClaw components.
///
/// Expected rejections (quota reached, session already open, ...) are never
/// reported through this type; they are typed outcomes of the engine calls.
#[derive(Debug, Error)]
pub enum ShiftClawError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed policy or schedule data. Fatal at configuration time.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ShiftClawError>;
