//! Transport layer error types.
//!
//! Every transport error is fatal to the connection it occurred on. Recovery
//! is left to the client's reconnect loop.

use std::io;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer sent a text message; only binary messages carry protocol data.
    #[error("non-binary message received")]
    NonBinary,

    /// WebSocket protocol or send failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// I/O error (listener, connect).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Whether this is an orderly close rather than a failure.
    pub fn is_close(&self) -> bool {
        matches!(
            self,
            TransportError::Closed
                | TransportError::WebSocket(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
                )
        )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_errors() {
        assert!(TransportError::Closed.is_close());
        assert!(TransportError::from(tungstenite::Error::ConnectionClosed).is_close());
        assert!(TransportError::from(tungstenite::Error::AlreadyClosed).is_close());

        assert!(!TransportError::NonBinary.is_close());
        assert!(!TransportError::Io(io::Error::other("reset")).is_close());
    }
}
