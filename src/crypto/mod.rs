//! Camlink - Security Layer
//!
//! Implements the cryptographic pieces of a connection:
//! - Ephemeral X25519 key agreement, truncated to a 16-byte secret
//! - AES-128-GCM envelope with a random 16-byte nonce per message
//! - The `auth0` / `auth1` handshake steps
//! - Password hashing through a pluggable [`CredentialHasher`]

mod aead;
mod handshake;
mod keys;
mod password;

pub use aead::{open, seal};
pub use handshake::Handshake;
pub use keys::{ConnectionSecret, EphemeralKeypair};
pub use password::{BcryptHasher, CredentialHasher, joined, spawn_hash, spawn_verify};
