//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection limit reached ({0})")]
    ConnectionLimit(usize),

    #[error("server shutting down")]
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::error::{CapacityError, Error as WsError};

    #[test]
    fn test_error_display() {
        assert!(ServerError::ConnectionLimit(4).to_string().contains('4'));
        assert_eq!(ServerError::ShuttingDown.to_string(), "server shutting down");

        let err: ServerError = std::io::Error::from(std::io::ErrorKind::AddrInUse).into();
        assert!(matches!(err, ServerError::Io(_)));
    }

    #[test]
    fn test_oversized_read_is_websocket_error() {
        let err: ServerError = WsError::Capacity(CapacityError::MessageTooLong {
            size: 2048,
            max_size: 1024,
        })
        .into();
        assert!(matches!(err, ServerError::WebSocket(_)));
        assert!(err.to_string().starts_with("WebSocket error"));
    }
}
