//! AES-128-GCM envelope.
//!
//! Every encrypted payload is self-contained:
//!
//! ```text
//! +------------------+------------------+----------------+
//! | Nonce (16 bytes) | Tag (16 bytes)   | Ciphertext...  |
//! +------------------+------------------+----------------+
//! ```
//!
//! The nonce is drawn fresh from the OS RNG for every call; no associated
//! data is authenticated. GCM accepts the 128-bit nonce by deriving its
//! counter block through GHASH.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes128;
use aes_gcm::{AesGcm, Nonce, Tag};
use rand::RngCore;
use rand::rngs::OsRng;

use super::keys::ConnectionSecret;
use crate::core::{AEAD_NONCE_SIZE, AEAD_OVERHEAD, CryptoError};

/// AES-128-GCM with a 16-byte nonce.
type Cipher = AesGcm<Aes128, U16>;

fn cipher(secret: &ConnectionSecret) -> Cipher {
    Cipher::new(secret.as_bytes().into())
}

/// Encrypt `plaintext` into `nonce || tag || ciphertext`.
pub fn seal(secret: &ConnectionSecret, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let mut buffer = plaintext.to_vec();
    let tag = cipher(secret)
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&nonce), b"", &mut buffer)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut envelope = Vec::with_capacity(AEAD_OVERHEAD + buffer.len());
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&tag);
    envelope.extend_from_slice(&buffer);
    Ok(envelope)
}

/// Decrypt a `nonce || tag || ciphertext` envelope.
///
/// Truncated input, a wrong key and any modified byte all fail with
/// [`CryptoError::DecryptionFailed`].
pub fn open(secret: &ConnectionSecret, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if envelope.len() < AEAD_OVERHEAD {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce, rest) = envelope.split_at(AEAD_NONCE_SIZE);
    let (tag, ciphertext) = rest.split_at(AEAD_OVERHEAD - AEAD_NONCE_SIZE);

    let mut buffer = ciphertext.to_vec();
    cipher(secret)
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(nonce),
            b"",
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SECRET_SIZE;

    fn secret(byte: u8) -> ConnectionSecret {
        ConnectionSecret::from_bytes([byte; SECRET_SIZE])
    }

    #[test]
    fn test_seal_open_sizes() {
        let key = secret(0x42);
        for size in [0usize, 1, 15, 16, 17, 1024, 65_536] {
            let plaintext: Vec<u8> = (0..size).map(|i| i as u8).collect();
            let envelope = seal(&key, &plaintext).unwrap();
            assert_eq!(envelope.len(), plaintext.len() + AEAD_OVERHEAD);
            assert_eq!(open(&key, &envelope).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = secret(1);
        let a = seal(&key, b"same").unwrap();
        let b = seal(&key, b"same").unwrap();
        assert_ne!(a[..AEAD_NONCE_SIZE], b[..AEAD_NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_tamper_any_byte_fails() {
        let key = secret(7);
        let envelope = seal(&key, b"tamper evident").unwrap();

        for i in 0..envelope.len() {
            let mut tampered = envelope.clone();
            tampered[i] ^= 0x01;
            assert!(
                matches!(open(&key, &tampered), Err(CryptoError::DecryptionFailed)),
                "byte {i}"
            );
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = seal(&secret(1), b"secret").unwrap();
        assert!(matches!(
            open(&secret(2), &envelope),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_truncated_envelope_fails() {
        let key = secret(3);
        let envelope = seal(&key, b"").unwrap();
        assert_eq!(open(&key, &envelope).unwrap(), b"");

        for len in [0, 1, AEAD_NONCE_SIZE, AEAD_OVERHEAD - 1] {
            assert!(matches!(
                open(&key, &envelope[..len]),
                Err(CryptoError::DecryptionFailed)
            ));
        }
    }
}
