//! Unified error types for onebridge.
//!
//! Each layer owns one enum: [`TransportError`] for sockets and listeners,
//! [`ApiError`] for outbound calls, [`FrameError`] for inbound frames that
//! cannot be understood, and [`AdapterError`] for the adapter lifecycle.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur in transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The URL that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// Connection closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// Binding the listener failed for a reason other than a port conflict.
    #[error("failed to bind {addr}: {reason}")]
    BindFailed {
        /// The bind address.
        addr: String,
        /// Reason for failure.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// The operation was abandoned because shutdown was requested.
    #[error("transport operation cancelled by shutdown")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// API Errors
// =============================================================================

/// Error type for API calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No live connection to send the call on.
    #[error("bot is not connected")]
    NotConnected,
    /// The API call timed out.
    #[error("API call '{action}' timed out")]
    Timeout {
        /// The endpoint that did not answer.
        action: String,
    },
    /// The remote side answered with a failure status.
    #[error("API error ({retcode}): {message}")]
    ApiFailed { retcode: i64, message: String },
}

// =============================================================================
// Frame Errors
// =============================================================================

/// Why an inbound frame was dropped.
///
/// Frame errors never leave the receive loop; they are logged and the loop
/// moves on to the next frame.
#[derive(Debug, Clone, Error)]
pub enum FrameError {
    /// The text is not valid JSON.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// Valid JSON, but neither a reply nor an event.
    #[error("unrecognized frame shape")]
    Unrecognized,
}

// =============================================================================
// Adapter Errors
// =============================================================================

/// Errors that can occur in adapter operations.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The remote side reported that our credentials were rejected.
    #[error("authentication rejected by remote ({retcode}): {message}")]
    AuthRejected { retcode: i64, message: String },

    /// The adapter was started twice.
    #[error("adapter already started")]
    AlreadyStarted,

    /// Start was interrupted by a shutdown request.
    #[error("adapter shut down before it was running")]
    Shutdown,

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;
