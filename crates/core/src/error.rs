//! Error types for the Aerie client
//!
//! Every failure carries a stable [`ResultCode`], a human-readable message
//! and the [`Origin`] where the client raised it. We use `thiserror` for the
//! `Display` and `Error` implementations.

use std::fmt;
use std::io;
use std::panic::Location;

use thiserror::Error;

use crate::result_code::{ErrorKind, ResultCode};

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Source location where an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    /// Source file
    pub file: &'static str,
    /// Line number
    pub line: u32,
    /// Column number
    pub column: u32,
}

impl Origin {
    /// Capture the caller's location.
    #[track_caller]
    pub fn caller() -> Self {
        let loc = Location::caller();
        Origin {
            file: loc.file(),
            line: loc.line(),
            column: loc.column(),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Error types for the Aerie client
#[derive(Debug, Error)]
pub enum Error {
    /// Socket-level I/O failure
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[source]
        source: io::Error,
        /// Where the error was raised
        origin: Origin,
    },

    /// Could not establish or keep a connection
    #[error("connection error: {message}")]
    Connection {
        /// Error details
        message: String,
        /// Where the error was raised
        origin: Origin,
    },

    /// Malformed response bytes
    #[error("protocol error: {message}")]
    Protocol {
        /// Error details
        message: String,
        /// Where the error was raised
        origin: Origin,
    },

    /// Invalid request shape, rejected before anything was sent
    #[error("parameter error: {message}")]
    Parameter {
        /// Error details
        message: String,
        /// Where the error was raised
        origin: Origin,
    },

    /// Per-attempt timeout elapsed on the client
    #[error("timeout: {message}")]
    Timeout {
        /// Error details
        message: String,
        /// Where the error was raised
        origin: Origin,
    },

    /// No node could be selected for the request
    #[error("invalid node: {message}")]
    InvalidNode {
        /// Error details
        message: String,
        /// Where the error was raised
        origin: Origin,
    },

    /// The node's connection pool is saturated
    #[error("no more connections available to node {node}")]
    NoMoreConnections {
        /// Node name
        node: String,
        /// Where the error was raised
        origin: Origin,
    },

    /// Cancelled by the caller
    #[error("client abort: {message}")]
    ClientAbort {
        /// Error details
        message: String,
        /// Where the error was raised
        origin: Origin,
    },

    /// Status reported by a server node
    #[error("{code}: {message}")]
    Server {
        /// Status code returned by the server
        code: ResultCode,
        /// Error details
        message: String,
        /// Where the error was raised
        origin: Origin,
    },
}

impl Error {
    /// Connection failure.
    #[track_caller]
    pub fn connection(message: impl Into<String>) -> Self {
        Error::Connection {
            message: message.into(),
            origin: Origin::caller(),
        }
    }

    /// Malformed response.
    #[track_caller]
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
            origin: Origin::caller(),
        }
    }

    /// Invalid request parameter.
    #[track_caller]
    pub fn parameter(message: impl Into<String>) -> Self {
        Error::Parameter {
            message: message.into(),
            origin: Origin::caller(),
        }
    }

    /// Client-side timeout.
    #[track_caller]
    pub fn timeout(message: impl Into<String>) -> Self {
        Error::Timeout {
            message: message.into(),
            origin: Origin::caller(),
        }
    }

    /// No routable node.
    #[track_caller]
    pub fn invalid_node(message: impl Into<String>) -> Self {
        Error::InvalidNode {
            message: message.into(),
            origin: Origin::caller(),
        }
    }

    /// Connection pool exhausted.
    #[track_caller]
    pub fn no_more_connections(node: impl Into<String>) -> Self {
        Error::NoMoreConnections {
            node: node.into(),
            origin: Origin::caller(),
        }
    }

    /// Cancelled by the caller.
    #[track_caller]
    pub fn client_abort(message: impl Into<String>) -> Self {
        Error::ClientAbort {
            message: message.into(),
            origin: Origin::caller(),
        }
    }

    /// Server-reported status.
    #[track_caller]
    pub fn server(code: ResultCode, message: impl Into<String>) -> Self {
        Error::Server {
            code,
            message: message.into(),
            origin: Origin::caller(),
        }
    }

    /// Server-reported status with the code's own description as message.
    #[track_caller]
    pub fn from_code(code: ResultCode) -> Self {
        Error::server(code, code.description())
    }

    /// Stable status code for this error.
    pub fn result_code(&self) -> ResultCode {
        match self {
            Error::Io { .. } => ResultCode::AsyncConnection,
            Error::Connection { .. } => ResultCode::InvalidHost,
            Error::Protocol { .. } => ResultCode::Client,
            Error::Parameter { .. } => ResultCode::Param,
            Error::Timeout { .. } => ResultCode::Timeout,
            Error::InvalidNode { .. } => ResultCode::InvalidNode,
            Error::NoMoreConnections { .. } => ResultCode::NoMoreConnections,
            Error::ClientAbort { .. } => ResultCode::ClientAbort,
            Error::Server { code, .. } => *code,
        }
    }

    /// Failure classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io { .. } | Error::Connection { .. } => ErrorKind::Connection,
            Error::Protocol { .. } => ErrorKind::Protocol,
            Error::Parameter { .. } => ErrorKind::Parameter,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::InvalidNode { .. } | Error::NoMoreConnections { .. } => ErrorKind::Cluster,
            Error::ClientAbort { .. } => ErrorKind::ClientAbort,
            Error::Server { code, .. } => code.kind(),
        }
    }

    /// Where the error was raised.
    pub fn origin(&self) -> Origin {
        match self {
            Error::Io { origin, .. }
            | Error::Connection { origin, .. }
            | Error::Protocol { origin, .. }
            | Error::Parameter { origin, .. }
            | Error::Timeout { origin, .. }
            | Error::InvalidNode { origin, .. }
            | Error::NoMoreConnections { origin, .. }
            | Error::ClientAbort { origin, .. }
            | Error::Server { origin, .. } => *origin,
        }
    }

    /// Transport-level failures that may succeed on another attempt.
    ///
    /// Server application errors and parameter errors are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io { .. } | Error::Connection { .. } | Error::Timeout { .. }
        )
    }

    /// True when the connection that produced this error must not be reused.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Error::Io { .. } | Error::Connection { .. } | Error::Protocol { .. } | Error::Timeout { .. }
        )
    }
}

impl From<io::Error> for Error {
    #[track_caller]
    fn from(source: io::Error) -> Self {
        Error::Io {
            source,
            origin: Origin::caller(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let err: Error = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer").into();
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(msg.contains("reset by peer"));
    }

    #[test]
    fn test_error_display_server() {
        let err = Error::from_code(ResultCode::RecordNotFound);
        assert!(err.to_string().contains("record not found"));
        assert_eq!(err.result_code(), ResultCode::RecordNotFound);
        assert_eq!(err.kind(), ErrorKind::Record);
    }

    #[test]
    fn test_parameter_error_code() {
        let err = Error::parameter("bin name too long");
        assert_eq!(err.result_code(), ResultCode::Param);
        assert_eq!(err.kind(), ErrorKind::Parameter);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_origin_points_at_caller() {
        let err = Error::timeout("read");
        let origin = err.origin();
        assert!(origin.file.ends_with("error.rs"));
        assert!(origin.line > 0);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::timeout("t").is_retryable());
        assert!(Error::connection("c").is_retryable());
        assert!(!Error::protocol("p").is_retryable());
        assert!(!Error::from_code(ResultCode::Generation).is_retryable());
        assert!(!Error::no_more_connections("n1").is_retryable());
        assert!(!Error::invalid_node("none").is_retryable());
    }

    #[test]
    fn test_poisons_connection() {
        assert!(Error::protocol("bad tag").poisons_connection());
        assert!(!Error::from_code(ResultCode::RecordNotFound).poisons_connection());
    }

    #[test]
    fn test_error_pattern_matching() {
        let err = Error::server(ResultCode::Generation, "expected 3");
        match err {
            Error::Server { code, message, .. } => {
                assert_eq!(code, ResultCode::Generation);
                assert_eq!(message, "expected 3");
            }
            _ => panic!("Wrong error variant"),
        }
    }
}
