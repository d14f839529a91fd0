//! Error types shared by the session store, supervisor and results readers

use crate::session::SessionStatus;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned synchronously by control-plane operations.
///
/// Launch and runtime failures that happen after `start` returned are not
/// surfaced here; they are recorded on the session and observed through
/// status polling.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Session '{0}' not found")]
    NotFound(Uuid),

    #[error("Cannot {event} a session in state '{from}'")]
    InvalidTransition {
        from: SessionStatus,
        event: &'static str,
    },

    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),

    #[error("Failed to launch engine: {0}")]
    Launch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Results file error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Report archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, ControlError>;
