//! Key agreement and the encrypted `auth1` exchange.
//!
//! Both roles run the same steps around their own network loop:
//!
//! ```text
//! Client                                  Camera
//!   |  auth0: client public key  ------->   |
//!   |  <-------  auth0: camera public key   |
//!   |         (both derive the secret)      |
//!   |  auth1: seal(password)     ------->   |  verify
//!   |  <-------  auth1: seal(settings)      |
//! ```
//!
//! [`Handshake`] holds the ephemeral key pair until the peer key arrives and
//! the connection secret afterwards. It performs no I/O.

use zeroize::Zeroizing;

use super::aead;
use super::keys::{ConnectionSecret, EphemeralKeypair};
use crate::core::{AuthError, CryptoError, LinkError, PUBLIC_KEY_SIZE, Settings};

/// Per-connection key agreement state.
pub struct Handshake {
    keypair: Option<EphemeralKeypair>,
    public_key: [u8; PUBLIC_KEY_SIZE],
    secret: Option<ConnectionSecret>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// Start a handshake with a fresh ephemeral key pair.
    pub fn new() -> Self {
        let keypair = EphemeralKeypair::generate();
        Self {
            public_key: keypair.public_key(),
            keypair: Some(keypair),
            secret: None,
        }
    }

    /// Payload of our `auth0` message.
    pub fn auth0_payload(&self) -> Vec<u8> {
        self.public_key.to_vec()
    }

    /// Derive the connection secret from the peer's `auth0` payload.
    ///
    /// Can only succeed once per handshake.
    pub fn complete(&mut self, peer_auth0: &[u8]) -> Result<(), CryptoError> {
        let keypair = self.keypair.take().ok_or_else(|| {
            CryptoError::KeyExchangeFailed("key pair already consumed".into())
        })?;
        self.secret = Some(keypair.agree(peer_auth0)?);
        Ok(())
    }

    /// Whether the connection secret exists.
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// The connection secret.
    pub fn secret(&self) -> Result<&ConnectionSecret, CryptoError> {
        self.secret.as_ref().ok_or(CryptoError::MissingSecret)
    }

    /// Encrypt an arbitrary payload under the connection secret.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        aead::seal(self.secret()?, plaintext)
    }

    /// Decrypt an arbitrary payload under the connection secret.
    pub fn open(&self, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
        aead::open(self.secret()?, envelope)
    }

    /// Encrypt a password (client `auth1`, `pwd`).
    pub fn seal_password(&self, password: &str) -> Result<Vec<u8>, CryptoError> {
        self.seal(password.as_bytes())
    }

    /// Decrypt a password sent by the client.
    pub fn open_password(&self, envelope: &[u8]) -> Result<Zeroizing<String>, LinkError> {
        let bytes = Zeroizing::new(self.open(envelope)?);
        let password = std::str::from_utf8(&bytes).map_err(|_| AuthError::InvalidEncoding)?;
        Ok(Zeroizing::new(password.to_owned()))
    }

    /// Encrypt settings as UTF-8 JSON (camera `auth1`, client `settings`).
    pub fn seal_settings<S: Settings>(&self, settings: &S) -> Result<Vec<u8>, LinkError> {
        let json = settings.to_json()?;
        Ok(self.seal(&json)?)
    }

    /// Decrypt and parse settings.
    pub fn open_settings<S: Settings>(&self, envelope: &[u8]) -> Result<S, LinkError> {
        let json = self.open(envelope)?;
        Ok(S::from_json(&json)?)
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("has_secret", &self.has_secret())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorCategory;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestSettings {
        fps: u32,
        name: String,
    }

    fn completed_pair() -> (Handshake, Handshake) {
        let mut client = Handshake::new();
        let mut camera = Handshake::new();
        let client_auth0 = client.auth0_payload();
        let camera_auth0 = camera.auth0_payload();

        camera.complete(&client_auth0).unwrap();
        client.complete(&camera_auth0).unwrap();
        (client, camera)
    }

    #[test]
    fn test_auth0_is_raw_public_key() {
        assert_eq!(Handshake::new().auth0_payload().len(), PUBLIC_KEY_SIZE);
    }

    #[test]
    fn test_password_exchange() {
        let (client, camera) = completed_pair();
        let auth1 = client.seal_password("hunter2").unwrap();
        assert_eq!(camera.open_password(&auth1).unwrap().as_str(), "hunter2");
    }

    #[test]
    fn test_settings_exchange() {
        let (client, camera) = completed_pair();
        let settings = TestSettings {
            fps: 15,
            name: "garage".into(),
        };
        let auth1 = camera.seal_settings(&settings).unwrap();
        assert_eq!(client.open_settings::<TestSettings>(&auth1).unwrap(), settings);
    }

    #[test]
    fn test_secret_missing_before_complete() {
        let handshake = Handshake::new();
        assert!(!handshake.has_secret());
        assert!(matches!(
            handshake.seal(b"x"),
            Err(CryptoError::MissingSecret)
        ));
    }

    #[test]
    fn test_complete_only_once() {
        let (mut client, camera) = completed_pair();
        assert!(matches!(
            client.complete(&camera.auth0_payload()),
            Err(CryptoError::KeyExchangeFailed(_))
        ));
    }

    #[test]
    fn test_mismatched_secrets_fail_closed() {
        let (client, _) = completed_pair();
        let (_, other_camera) = completed_pair();
        let auth1 = client.seal_password("pw").unwrap();
        let err = other_camera.open_password(&auth1).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Crypto);
    }

    #[test]
    fn test_password_must_be_utf8() {
        let (client, camera) = completed_pair();
        let envelope = client.seal(&[0xFF, 0xFE]).unwrap();
        assert!(matches!(
            camera.open_password(&envelope),
            Err(LinkError::Auth(AuthError::InvalidEncoding))
        ));
    }

    #[test]
    fn test_garbage_settings_rejected() {
        let (client, camera) = completed_pair();
        let envelope = camera.seal(b"not json").unwrap();
        let err = client.open_settings::<TestSettings>(&envelope).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Protocol);
    }
}
