//! Core error types for Kore Remote

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use kr_protocol::RpcError;
use thiserror::Error;

/// Transport-level failures: opening, reading or writing the connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Host could not be reached
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    /// Host refused the connection
    #[error("Connection refused: {0}")]
    Refused(String),

    /// Connection was reset mid-stream
    #[error("Connection reset: {0}")]
    Reset(String),

    /// Connection lost (end of stream or read failure)
    #[error("Connection lost: {0}")]
    Lost(String),

    /// Connect attempt timed out
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// Host rejected the supplied credentials
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Connection was closed locally
    #[error("Connection closed")]
    Closed,
}

impl ConnectionError {
    /// Classify an I/O error
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectionError::Refused(err.to_string()),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ConnectionError::Reset(err.to_string()),
            io::ErrorKind::UnexpectedEof => ConnectionError::Lost(err.to_string()),
            _ => ConnectionError::Unreachable(err.to_string()),
        }
    }
}

/// Outcome of a single call that did not produce a result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// The connection failed underneath the call
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The host answered with an error object
    #[error("Host error: {0}")]
    Protocol(#[from] RpcError),

    /// No response within the deadline
    #[error("Call {method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    /// The call was discarded before completion
    #[error("Call cancelled")]
    Cancelled,

    /// The params could not be serialized
    #[error("Failed to encode params: {0}")]
    Encode(String),

    /// The result did not match the expected type
    #[error("Failed to decode result: {0}")]
    Decode(String),

    /// Every request id is held by a pending call
    #[error("Too many calls in flight ({0})")]
    TooManyPending(usize),
}

impl CallError {
    /// Whether the error comes from the connection rather than the host
    pub fn is_connection_level(&self) -> bool {
        matches!(self, CallError::Connection(_))
    }

    /// Host error code, if the host reported one
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            CallError::Protocol(err) => Some(err.code),
            _ => None,
        }
    }
}

/// Non-fatal failure of the best-effort control channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BestEffortSendFailure {
    /// Channel was disabled by an earlier failure
    #[error("Control channel disabled")]
    Disabled,

    /// Datagram could not be sent
    #[error("Control packet send failed: {0}")]
    Io(String),

    /// Message could not be framed
    #[error("Control packet encoding failed: {0}")]
    Encode(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Named host is not configured
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    /// No hosts configured at all
    #[error("No hosts configured")]
    NoHosts,

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_classification() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            ConnectionError::from_io(&refused),
            ConnectionError::Refused(_)
        ));

        let reset = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(
            ConnectionError::from_io(&reset),
            ConnectionError::Reset(_)
        ));

        let other = io::Error::new(io::ErrorKind::AddrNotAvailable, "nope");
        assert!(matches!(
            ConnectionError::from_io(&other),
            ConnectionError::Unreachable(_)
        ));
    }

    #[test]
    fn test_protocol_error_passes_message_through() {
        let err = CallError::from(RpcError::new(-32100, "Failed to execute method."));
        assert_eq!(err.rpc_code(), Some(-32100));
        assert_eq!(err.to_string(), "Host error: Failed to execute method. (code -32100)");
        assert!(!err.is_connection_level());
    }

    #[test]
    fn test_connection_error_converts_to_call_error() {
        let err: CallError = ConnectionError::Closed.into();
        assert!(err.is_connection_level());
    }
}
