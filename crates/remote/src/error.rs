//! Error types for the RPC chain.

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for chain operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chain operations.
///
/// A proxy call fails with exactly one of these; no partially decoded result
/// is ever returned.
#[derive(Debug, Error)]
pub enum Error {
    /// A required input was missing or empty.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// A value failed to encode or decode with the chain codec.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No matching response arrived before the deadline.
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// The session closed while the call was outstanding.
    #[error("Session disconnected")]
    Disconnected,

    /// Frame or envelope inconsistency.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The remote service reported a failure.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Socket-level error at the factory boundary (bind, connect).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame declared or carried more bytes than allowed.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the frame.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Received payload is not a valid envelope.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),
}

/// Category of a failure reported by the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorCode {
    /// No service registered under the requested id.
    ServiceNotFound,
    /// The service does not implement the requested method.
    MethodNotFound,
    /// Request arguments failed to decode.
    InvalidArguments,
    /// The service failed while handling the call.
    Internal,
}

impl std::fmt::Display for RemoteErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            Self::ServiceNotFound => "SERVICE_NOT_FOUND",
            Self::MethodNotFound => "METHOD_NOT_FOUND",
            Self::InvalidArguments => "INVALID_ARGUMENTS",
            Self::Internal => "INTERNAL_ERROR",
        };
        f.write_str(code)
    }
}

/// Failure carried in an `Error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RemoteError {
    /// Error code for categorization.
    pub code: RemoteErrorCode,
    /// Human-readable error message.
    pub message: String,
}

impl RemoteError {
    /// Create a remote error.
    pub fn new(code: RemoteErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// No service registered under `service_id`.
    #[must_use]
    pub fn service_not_found(service_id: &str) -> Self {
        Self::new(
            RemoteErrorCode::ServiceNotFound,
            format!("no service registered as '{service_id}'"),
        )
    }

    /// The service has no method named `method`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            RemoteErrorCode::MethodNotFound,
            format!("unknown method '{method}'"),
        )
    }

    /// Generic service failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::Internal, message)
    }
}

impl From<Error> for RemoteError {
    fn from(err: Error) -> Self {
        match err {
            Error::Serialization(message) => Self::new(RemoteErrorCode::InvalidArguments, message),
            Error::Remote(remote) => remote,
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<ciborium::de::Error<io::Error>> for Error {
    fn from(err: ciborium::de::Error<io::Error>) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<ciborium::ser::Error<io::Error>> for Error {
    fn from(err: ciborium::ser::Error<io::Error>) -> Self {
        Self::Serialization(err.to_string())
    }
}
