//! Error types for the Gatekeeper service.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The shared counter store failed; never a rate decision
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatekeeperError {
    /// Whether this error came from the counter store.
    pub fn is_store(&self) -> bool {
        matches!(self, GatekeeperError::Store(_))
    }
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
