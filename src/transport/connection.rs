//! Connection phases for both roles.
//!
//! Each connection is driven by a single task; the phase is the state the
//! router consults before dispatching a message.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of one accepted or dialed connection.
///
/// Ids are never reused within a process role, so a late result (a credential
/// hash finishing after the peer left, a timer firing after teardown) can be
/// matched against the connection it was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out increasing [`ConnectionId`]s, starting at 1.
#[derive(Debug, Default)]
pub struct ConnectionIds {
    last: AtomicU64,
}

impl ConnectionIds {
    /// Create a generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused id.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Camera-side phase of one accepted peer.
///
/// ```text
/// Connected -> KeyExchangeSent -> SecretComputed -> AwaitingAuth1
///           -> Verifying -> Ready -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraPhase {
    /// Socket accepted, nothing sent yet.
    Connected,
    /// Camera `auth0` sent; waiting for the peer's public key.
    KeyExchangeSent,
    /// Connection secret derived.
    SecretComputed,
    /// Waiting for the encrypted password.
    AwaitingAuth1,
    /// Password handed to the verifier.
    Verifying,
    /// Authenticated; frames flow.
    Ready,
    /// Torn down.
    Closed,
}

impl CameraPhase {
    /// Whether a connection secret exists in this phase.
    pub fn has_secret(self) -> bool {
        matches!(
            self,
            Self::SecretComputed | Self::AwaitingAuth1 | Self::Verifying | Self::Ready
        )
    }
}

impl fmt::Display for CameraPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connected => "connected",
            Self::KeyExchangeSent => "key-exchange-sent",
            Self::SecretComputed => "secret-computed",
            Self::AwaitingAuth1 => "awaiting-auth1",
            Self::Verifying => "verifying",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Client-side connection phase.
///
/// ```text
/// Disconnected -> Connecting -> KeyExchangeSent -> SecretComputed
///              -> AuthSent -> Ready
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientPhase {
    /// No transport.
    #[default]
    Disconnected,
    /// Dialing the camera.
    Connecting,
    /// Client `auth0` sent.
    KeyExchangeSent,
    /// Connection secret derived.
    SecretComputed,
    /// Encrypted password sent.
    AuthSent,
    /// Authenticated; frames flow.
    Ready,
}

impl ClientPhase {
    /// Whether the client is authenticated.
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

impl fmt::Display for ClientPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::KeyExchangeSent => "key-exchange-sent",
            Self::SecretComputed => "secret-computed",
            Self::AuthSent => "auth-sent",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_increase() {
        let ids = ConnectionIds::new();
        let first = ids.next_id();
        let second = ids.next_id();
        assert_eq!(first.get(), 1);
        assert_eq!(second.get(), 2);
        assert!(second > first);
        assert_eq!(second.to_string(), "#2");
    }

    #[test]
    fn test_camera_phase_secret() {
        assert!(!CameraPhase::Connected.has_secret());
        assert!(!CameraPhase::KeyExchangeSent.has_secret());
        assert!(CameraPhase::AwaitingAuth1.has_secret());
        assert!(CameraPhase::Ready.has_secret());
        assert!(!CameraPhase::Closed.has_secret());
    }

    #[test]
    fn test_client_phase_default() {
        assert_eq!(ClientPhase::default(), ClientPhase::Disconnected);
        assert!(!ClientPhase::AuthSent.is_ready());
        assert!(ClientPhase::Ready.is_ready());
        assert_eq!(ClientPhase::AuthSent.to_string(), "auth-sent");
    }
}
