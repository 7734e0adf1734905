//! Runtime error types.

use thiserror::Error;

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The adapter failed to start or stopped abnormally.
    #[error("Adapter error: {0}")]
    Adapter(#[from] onebridge_core::AdapterError),

    /// Installing a signal handler failed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
