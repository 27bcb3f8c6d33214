//! Error types for the camlink protocol.
//!
//! Every error ends the connection it occurred on. Nothing here is retried in
//! place; recovery happens through the client's reconnect loop or the
//! camera's restart.

use std::io;

use thiserror::Error;

use crate::transport::{MessageError, TransportError};

/// Errors in the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// ECDH could not produce a usable shared secret.
    #[error("key exchange failed: {0}")]
    KeyExchangeFailed(String),

    /// No connection secret has been derived yet.
    #[error("no connection secret established")]
    MissingSecret,

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag, wrong key or truncated envelope).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,
}

/// Password verification and hashing errors.
///
/// On the wire every variant looks the same: the camera closes the socket
/// without a reply.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The password did not match the stored credential.
    #[error("password rejected")]
    Rejected,

    /// The password is not valid UTF-8.
    #[error("password is not valid utf-8")]
    InvalidEncoding,

    /// Another peer already holds the camera's single connection slot.
    #[error("camera already has an authenticated peer")]
    Occupied,

    /// The hashing collaborator failed.
    #[error("credential hashing failed: {0}")]
    Hash(String),
}

/// Malformed input or messages arriving out of phase.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Header could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(#[from] MessageError),

    /// Message kind not accepted in the current phase.
    #[error("unexpected {kind} message in phase {phase}")]
    UnexpectedMessage {
        /// Kind of the rejected message.
        kind: String,
        /// Phase the connection was in.
        phase: String,
    },

    /// Decrypted frame shorter than its sub-header.
    #[error("frame payload too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// Settings could not be serialized or parsed.
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] serde_json::Error),
}

/// A peer stopped making progress.
#[derive(Debug, Error)]
pub enum LivenessError {
    /// Peer did not authenticate in time.
    #[error("authentication timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    /// No acknowledgement within the liveness window.
    #[error("no acknowledgements for {0:?}")]
    AckTimeout(std::time::Duration),

    /// No frame within the idle window.
    #[error("no frames for {0:?}")]
    FrameTimeout(std::time::Duration),
}

/// Credential and configuration storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("store i/o error: {0}")]
    Io(#[from] io::Error),

    /// Stored record could not be (de)serialized.
    #[error("store format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Failure category, following the protocol's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Socket errors, send failures, non-binary data.
    Transport,
    /// Key exchange or AEAD failures.
    Crypto,
    /// Password verification failures.
    Auth,
    /// Malformed or out-of-phase messages.
    Protocol,
    /// Missing acks, frames or authentication.
    Liveness,
    /// Credential or configuration persistence.
    Storage,
}

/// Top-level error for a single connection.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Authentication error.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Liveness error.
    #[error("liveness error: {0}")]
    Liveness(#[from] LivenessError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<MessageError> for LinkError {
    fn from(err: MessageError) -> Self {
        LinkError::Protocol(ProtocolError::Malformed(err))
    }
}

impl LinkError {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            LinkError::Transport(_) => ErrorCategory::Transport,
            LinkError::Crypto(_) => ErrorCategory::Crypto,
            LinkError::Auth(_) => ErrorCategory::Auth,
            LinkError::Protocol(_) => ErrorCategory::Protocol,
            LinkError::Liveness(_) => ErrorCategory::Liveness,
            LinkError::Store(_) => ErrorCategory::Storage,
        }
    }
}

/// Result type for connection-level operations.
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            LinkError::from(CryptoError::DecryptionFailed).category(),
            ErrorCategory::Crypto
        );
        assert_eq!(LinkError::from(AuthError::Rejected).category(), ErrorCategory::Auth);
        assert_eq!(
            LinkError::from(MessageError::TooShort { expected: 13, actual: 2 }).category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            LinkError::from(LivenessError::AckTimeout(std::time::Duration::from_secs(10)))
                .category(),
            ErrorCategory::Liveness
        );
        assert_eq!(
            LinkError::from(TransportError::NonBinary).category(),
            ErrorCategory::Transport
        );
    }

    #[test]
    fn test_auth_errors_share_category() {
        // Rejections and hashing failures must be handled the same way.
        let rejected = LinkError::from(AuthError::Rejected);
        let hashing = LinkError::from(AuthError::Hash("cost".into()));
        assert_eq!(rejected.category(), hashing.category());
    }
}
