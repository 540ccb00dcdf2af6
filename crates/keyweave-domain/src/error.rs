//! Cache client error types

use std::fmt;

use thiserror::Error;

/// Cache client errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Index {index} out of range for key {key}")]
    OutOfRange { key: String, index: i64 },

    #[error("Server rejected {command}: {code} {message}")]
    Server {
        command: String,
        code: String,
        message: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl CacheError {
    /// Build a server error from a raw error line such as
    /// `WRONGTYPE Operation against a key holding the wrong kind of value`.
    pub fn server(command: impl Into<String>, line: &str) -> Self {
        let (code, message) = line.split_once(' ').unwrap_or((line, ""));
        Self::Server {
            command: command.into(),
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the same command may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Whether a server error reports an index or position outside the
    /// current bounds of the target collection.
    #[must_use]
    pub fn is_out_of_range_reply(&self) -> bool {
        match self {
            Self::Server { message, .. } => {
                message.contains("index out of range") || message.contains("no such key")
            }
            _ => false,
        }
    }
}

/// Transport failure causes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Connection dropped or reset by peer
    ConnectionReset,
    /// Connection could not be established
    ConnectionRefused,
    /// No reply within the response deadline
    Timeout,
    /// Other I/O failure
    Io,
    /// Malformed or unexpected frame, not retryable
    Protocol,
}

impl TransportErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionReset => "connection reset",
            Self::ConnectionRefused => "connection refused",
            Self::Timeout => "timeout",
            Self::Io => "io",
            Self::Protocol => "protocol violation",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection-level failure
#[derive(Debug, Clone, Error)]
#[error("Transport error ({kind}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self.kind, TransportErrorKind::Protocol)
    }
}

/// Reply shape does not match the requested type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot decode {actual} as {expected}")]
pub struct DecodeError {
    pub expected: &'static str,
    pub actual: String,
}

impl DecodeError {
    pub fn new(expected: &'static str, actual: impl Into<String>) -> Self {
        Self {
            expected,
            actual: actual.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_subset() {
        for kind in [
            TransportErrorKind::ConnectionReset,
            TransportErrorKind::ConnectionRefused,
            TransportErrorKind::Timeout,
            TransportErrorKind::Io,
        ] {
            assert!(CacheError::from(TransportError::new(kind, "x")).is_retryable());
        }
        let fatal = CacheError::from(TransportError::new(TransportErrorKind::Protocol, "bad frame"));
        assert!(!fatal.is_retryable());
        assert!(!CacheError::InvalidArgument("no keys".into()).is_retryable());
    }

    #[test]
    fn test_server_line_split() {
        let err = CacheError::server("LSET", "ERR index out of range");
        match &err {
            CacheError::Server { command, code, message } => {
                assert_eq!(command, "LSET");
                assert_eq!(code, "ERR");
                assert_eq!(message, "index out of range");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_out_of_range_reply());
        assert!(!CacheError::server("HINCRBY", "ERR hash value is not an integer").is_out_of_range_reply());
    }
}
