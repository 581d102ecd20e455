//! Protocol error types and JSON-RPC error kinds.

use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during reassembly or message handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(&'static str),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("fragment out of order: expected offset {expected}, got {actual}")]
    OutOfOrder { expected: u64, actual: u64 },

    #[error("unexpected frame number: expected {expected}, got {actual}")]
    UnexpectedFrame { expected: u32, actual: u32 },

    #[error("continuation fragment with no message in progress")]
    NoMessageInProgress,

    #[error("fragment overruns frame: ends at {end}, frame length {len}")]
    FrameOverrun { end: u64, len: u64 },

    #[error("encoding failure: {0}")]
    Encoding(serde_json::Error),
}

/// Outcome kinds reported by a command handler.
///
/// Numeric codes follow the JSON-RPC 2.0 reserved range and are part of the
/// wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoError,
    MethodNotFound,
    InvalidParams,
    InternalError,
}

impl ErrorKind {
    /// Returns the JSON-RPC error code.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::NoError => 0,
            ErrorKind::MethodNotFound => -32601,
            ErrorKind::InvalidParams => -32602,
            ErrorKind::InternalError => -32603,
        }
    }

    /// Maps a JSON-RPC error code back to its kind.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ErrorKind::NoError),
            -32601 => Some(ErrorKind::MethodNotFound),
            -32602 => Some(ErrorKind::InvalidParams),
            -32603 => Some(ErrorKind::InternalError),
            _ => None,
        }
    }

    /// Message used when the handler supplies none.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::NoError => "OK",
            ErrorKind::MethodNotFound => "Method not found",
            ErrorKind::InvalidParams => "Invalid params",
            ErrorKind::InternalError => "Internal error",
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, ErrorKind::NoError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NoError => write!(f, "NO_ERROR"),
            ErrorKind::MethodNotFound => write!(f, "METHOD_NOT_FOUND"),
            ErrorKind::InvalidParams => write!(f, "INVALID_PARAMS"),
            ErrorKind::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_codes() {
        assert_eq!(ErrorKind::NoError.code(), 0);
        assert_eq!(ErrorKind::MethodNotFound.code(), -32601);
        assert_eq!(ErrorKind::InvalidParams.code(), -32602);
        assert_eq!(ErrorKind::InternalError.code(), -32603);
    }

    #[test]
    fn test_error_kind_from_code() {
        for kind in [
            ErrorKind::NoError,
            ErrorKind::MethodNotFound,
            ErrorKind::InvalidParams,
            ErrorKind::InternalError,
        ] {
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code(-1), None);
        // Transport-level codes are never a handler outcome
        assert_eq!(ErrorKind::from_code(-32700), None);
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(format!("{}", ErrorKind::NoError), "NO_ERROR");
        assert_eq!(
            format!("{}", ErrorKind::MethodNotFound),
            "METHOD_NOT_FOUND"
        );
        assert_eq!(format!("{}", ErrorKind::InternalError), "INTERNAL_ERROR");
        assert!(!ErrorKind::NoError.is_error());
        assert!(ErrorKind::InvalidParams.is_error());
    }

    #[test]
    fn test_protocol_error_display() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = ProtocolError::from(json_err);
        assert!(matches!(err, ProtocolError::Json(_)));
        assert!(err.to_string().starts_with("malformed payload"));

        let err = ProtocolError::MessageTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::OutOfOrder {
            expected: 10,
            actual: 12,
        };
        assert!(err.to_string().contains("12"));

        let err = ProtocolError::InvalidEnvelope("method");
        assert!(err.to_string().contains("method"));
    }
}
