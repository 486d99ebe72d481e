//! Error types for the CubeSQL client
//!
//! This module defines every error that can surface from a CubeSQL session,
//! from socket and framing failures up to server-reported statement errors
//! and local handle misuse.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::constants::error_code;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the CubeSQL client
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Host name could not be resolved to any address
    #[error("unable to resolve host {host}: {message}")]
    Resolution { host: String, message: String },

    /// Every resolved address refused the connection
    #[error("connection refused by {address}")]
    Refused { address: String },

    /// Connect, read or write did not complete in time
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// TLS setup or certificate failure
    #[error("security error: {0}")]
    Security(String),

    /// Connection closed by the peer or already released
    #[error("connection closed")]
    ConnectionClosed,

    /// In-flight operation interrupted by `cancel`
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Frame that fails signature, length or shape validation
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Buffer underflow while decoding a payload
    #[error("buffer underflow: need {needed} bytes but only {available} available")]
    BufferUnderflow { needed: usize, available: usize },

    /// Unexpected server response
    #[error("protocol error: {0}")]
    Protocol(String),

    // =========================================================================
    // Server Errors
    // =========================================================================
    /// Login rejected by the server
    #[error("authentication failed ({code}): {message}")]
    Authentication { code: i32, message: String },

    /// Statement rejected by the server during prepare
    #[error("compile error ({code}): {message}")]
    Compile { code: i32, message: String },

    /// Database or object referenced by name does not exist
    #[error("not found ({code}): {message}")]
    NotFound { code: i32, message: String },

    /// Any other error reported by the server
    #[error("server error ({code}): {message}")]
    Server { code: i32, message: String },

    // =========================================================================
    // Handle Errors
    // =========================================================================
    /// Bind ordinal outside `1..=count`
    #[error("bind index {index} out of range (1..={count})")]
    BindRange { index: usize, count: usize },

    /// Program or cursor used after `close`/`free`
    #[error("{0} used after close")]
    UseAfterClose(&'static str),

    /// Cursor read at EOF, a column outside the range, or a value too
    /// large for its wire field
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Program or cursor used after its session disconnected
    #[error("{0} belongs to a disconnected session")]
    StaleHandle(&'static str),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration or connection URL
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a server error from a reply error code and message
    pub fn server(code: i32, message: impl Into<String>) -> Self {
        Error::Server {
            code,
            message: message.into(),
        }
    }

    /// Integer code for this error, as reported by `Session::last_error`
    ///
    /// Server errors keep the server's code. Client-side failures map onto the
    /// SDK's negative client codes and socket error codes; each kind of local
    /// handle misuse has its own code from -10 down.
    pub fn code(&self) -> i32 {
        match self {
            Error::Authentication { code, .. }
            | Error::Compile { code, .. }
            | Error::NotFound { code, .. }
            | Error::Server { code, .. } => *code,
            Error::Resolution { .. } | Error::Refused { .. } => error_code::ERR_SOCKET,
            Error::Timeout(_) => error_code::ERR_SOCKET_TIMEOUT,
            Error::ConnectionClosed | Error::Cancelled | Error::Io(_) => {
                error_code::ERR_SOCKET_READ
            }
            Error::Security(_) => error_code::ERR_SSL,
            Error::MalformedFrame(_) => error_code::ERR_WRONG_HEADER,
            Error::BufferUnderflow { .. } | Error::Protocol(_) => error_code::PROTOCOL_ERROR,
            Error::BindRange { .. } => error_code::BIND_RANGE_ERROR,
            Error::UseAfterClose(_) => error_code::USE_AFTER_CLOSE_ERROR,
            Error::OutOfRange(_) => error_code::OUT_OF_RANGE_ERROR,
            Error::StaleHandle(_) => error_code::STALE_HANDLE_ERROR,
            Error::InvalidConfig(_) => error_code::PARAMETER_ERROR,
        }
    }

    /// Check if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Resolution { .. }
                | Error::Refused { .. }
                | Error::Timeout(_)
                | Error::ConnectionClosed
                | Error::Cancelled
                | Error::Io(_)
        )
    }

    /// Check if this error is recoverable by reconnecting
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionClosed | Error::Refused { .. }
        )
    }

    /// Check if this error was detected locally without a network round-trip
    pub fn is_local_misuse(&self) -> bool {
        matches!(
            self,
            Error::BindRange { .. }
                | Error::UseAfterClose(_)
                | Error::OutOfRange(_)
                | Error::StaleHandle(_)
        )
    }
}
