//! Ephemeral X25519 keys and the per-connection secret.

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::{CryptoError, PUBLIC_KEY_SIZE, SECRET_SIZE};

/// Symmetric key of one connection: the first 16 bytes of the ECDH output.
///
/// Zeroized on drop. Never persisted and never logged.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ConnectionSecret([u8; SECRET_SIZE]);

impl ConnectionSecret {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for ConnectionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConnectionSecret(..)")
    }
}

/// Single-use key pair generated when a transport connects.
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public key as sent in `auth0`.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Run ECDH against the peer's public key and derive the connection
    /// secret. Consumes the key pair.
    ///
    /// Fails when the peer key has the wrong length or yields a
    /// non-contributory (all-zero) shared secret.
    pub fn agree(self, peer_public: &[u8]) -> Result<ConnectionSecret, CryptoError> {
        let peer: [u8; PUBLIC_KEY_SIZE] = peer_public.try_into().map_err(|_| {
            CryptoError::KeyExchangeFailed(format!(
                "peer public key must be {PUBLIC_KEY_SIZE} bytes, got {}",
                peer_public.len()
            ))
        })?;

        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(CryptoError::KeyExchangeFailed(
                "non-contributory shared secret".into(),
            ));
        }

        let mut key = [0u8; SECRET_SIZE];
        key.copy_from_slice(&shared.as_bytes()[..SECRET_SIZE]);
        Ok(ConnectionSecret(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agreement_matches() {
        let alice = EphemeralKeypair::generate();
        let bob = EphemeralKeypair::generate();
        let alice_pub = alice.public_key();
        let bob_pub = bob.public_key();

        assert_ne!(alice_pub, bob_pub);

        let a = alice.agree(&bob_pub).unwrap();
        let b = bob.agree(&alice_pub).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_wrong_key_length() {
        let kp = EphemeralKeypair::generate();
        assert!(matches!(
            kp.agree(&[1u8; 31]),
            Err(CryptoError::KeyExchangeFailed(_))
        ));
    }

    #[test]
    fn test_low_order_point_rejected() {
        let kp = EphemeralKeypair::generate();
        assert!(matches!(
            kp.agree(&[0u8; PUBLIC_KEY_SIZE]),
            Err(CryptoError::KeyExchangeFailed(_))
        ));
    }

    #[test]
    fn test_secret_debug_hides_bytes() {
        let secret = ConnectionSecret::from_bytes([0xAB; SECRET_SIZE]);
        assert_eq!(format!("{secret:?}"), "ConnectionSecret(..)");
    }
}
