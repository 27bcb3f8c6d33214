//! Phase-based message admission.
//!
//! A message is only dispatched when its kind is valid for the connection's
//! current phase. Everything else, including unknown tags, is a protocol
//! violation and the caller closes the connection.

use super::connection::{CameraPhase, ClientPhase};
use super::message::{CameraKind, ClientKind};
use crate::core::ProtocolError;

/// Check a client → camera message against the camera's phase.
pub fn admit_at_camera(phase: CameraPhase, kind: ClientKind) -> Result<(), ProtocolError> {
    let accepted = match kind {
        ClientKind::Auth0 => phase == CameraPhase::KeyExchangeSent,
        ClientKind::Auth1 => phase == CameraPhase::AwaitingAuth1,
        ClientKind::Ack | ClientKind::Settings | ClientKind::Pwd => phase == CameraPhase::Ready,
        ClientKind::Unknown => false,
    };
    accepted.then_some(()).ok_or_else(|| unexpected(kind, phase))
}

/// Check a camera → client message against the client's phase.
pub fn admit_at_client(phase: ClientPhase, kind: CameraKind) -> Result<(), ProtocolError> {
    let accepted = match kind {
        CameraKind::Auth0 => phase == ClientPhase::KeyExchangeSent,
        CameraKind::Auth1 => phase == ClientPhase::AuthSent,
        CameraKind::Frame => phase == ClientPhase::Ready,
        CameraKind::Unknown => false,
    };
    accepted.then_some(()).ok_or_else(|| unexpected(kind, phase))
}

fn unexpected(kind: impl ToString, phase: impl ToString) -> ProtocolError {
    ProtocolError::UnexpectedMessage {
        kind: kind.to_string(),
        phase: phase.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAMERA_PHASES: [CameraPhase; 7] = [
        CameraPhase::Connected,
        CameraPhase::KeyExchangeSent,
        CameraPhase::SecretComputed,
        CameraPhase::AwaitingAuth1,
        CameraPhase::Verifying,
        CameraPhase::Ready,
        CameraPhase::Closed,
    ];

    const CLIENT_PHASES: [ClientPhase; 6] = [
        ClientPhase::Disconnected,
        ClientPhase::Connecting,
        ClientPhase::KeyExchangeSent,
        ClientPhase::SecretComputed,
        ClientPhase::AuthSent,
        ClientPhase::Ready,
    ];

    #[test]
    fn test_camera_handshake_order() {
        assert!(admit_at_camera(CameraPhase::KeyExchangeSent, ClientKind::Auth0).is_ok());
        assert!(admit_at_camera(CameraPhase::AwaitingAuth1, ClientKind::Auth1).is_ok());

        assert!(admit_at_camera(CameraPhase::KeyExchangeSent, ClientKind::Auth1).is_err());
        assert!(admit_at_camera(CameraPhase::AwaitingAuth1, ClientKind::Auth0).is_err());
        assert!(admit_at_camera(CameraPhase::Ready, ClientKind::Auth0).is_err());
        assert!(admit_at_camera(CameraPhase::Ready, ClientKind::Auth1).is_err());
    }

    #[test]
    fn test_camera_ready_only_kinds() {
        for kind in [ClientKind::Ack, ClientKind::Settings, ClientKind::Pwd] {
            for phase in CAMERA_PHASES {
                assert_eq!(
                    admit_at_camera(phase, kind).is_ok(),
                    phase == CameraPhase::Ready,
                    "{kind} in {phase}"
                );
            }
        }
    }

    #[test]
    fn test_camera_rejects_while_verifying() {
        for kind in [ClientKind::Auth1, ClientKind::Ack, ClientKind::Pwd] {
            assert!(admit_at_camera(CameraPhase::Verifying, kind).is_err());
        }
    }

    #[test]
    fn test_unknown_always_rejected() {
        for phase in CAMERA_PHASES {
            assert!(admit_at_camera(phase, ClientKind::Unknown).is_err());
        }
        for phase in CLIENT_PHASES {
            assert!(admit_at_client(phase, CameraKind::Unknown).is_err());
        }
    }

    #[test]
    fn test_client_frame_before_ready() {
        for phase in CLIENT_PHASES {
            assert_eq!(
                admit_at_client(phase, CameraKind::Frame).is_ok(),
                phase == ClientPhase::Ready
            );
        }
    }

    #[test]
    fn test_client_handshake_order() {
        assert!(admit_at_client(ClientPhase::KeyExchangeSent, CameraKind::Auth0).is_ok());
        assert!(admit_at_client(ClientPhase::AuthSent, CameraKind::Auth1).is_ok());
        assert!(admit_at_client(ClientPhase::AuthSent, CameraKind::Auth0).is_err());
        assert!(admit_at_client(ClientPhase::Ready, CameraKind::Auth1).is_err());
    }

    #[test]
    fn test_rejection_names_kind_and_phase() {
        let err = admit_at_client(ClientPhase::AuthSent, CameraKind::Frame).unwrap_err();
        assert_eq!(err.to_string(), "unexpected frame message in phase auth-sent");
    }
}
