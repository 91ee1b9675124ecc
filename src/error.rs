//! Error types for the Pinglimit service.

use thiserror::Error;

/// Main error type for Pinglimit operations.
#[derive(Error, Debug)]
pub enum PinglimitError {
    /// Client identifier is empty or malformed
    #[error("Invalid client identifier: {0}")]
    InvalidClient(String),

    /// Request cost is not a positive finite number
    #[error("Invalid cost: {0}")]
    InvalidCost(String),

    /// No client identifier was presented and the policy rejects anonymous requests
    #[error("Missing client identifier header")]
    MissingClientId,

    /// Bucket limits (capacity or refill rate) are not usable
    #[error("Invalid limits: {0}")]
    InvalidLimits(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PinglimitError {
    /// Whether this error was caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PinglimitError::InvalidClient(_)
                | PinglimitError::InvalidCost(_)
                | PinglimitError::MissingClientId
                | PinglimitError::InvalidLimits(_)
        )
    }
}

/// Result type alias for Pinglimit operations.
pub type Result<T> = std::result::Result<T, PinglimitError>;
