//! # Camlink
//!
//! Encrypted, congestion-controlled live frame streaming between a **camera**
//! and its **client** over a WebSocket.
//!
//! - **Trust**: ephemeral X25519 key agreement per connection, then a shared
//!   password sent under the derived key and checked against a bcrypt hash
//! - **Confidentiality**: every payload after the key exchange travels in an
//!   AES-128-GCM envelope (`nonce16 || tag16 || ciphertext`)
//! - **Pacing**: a Jacobson RTT estimator drives a sliding send window; a
//!   bounded queue sheds every other frame when the client falls behind
//! - **Lifecycle**: the client reconnects with jitter, the camera keeps a
//!   single authenticated peer and restarts after a password rotation
//!
//! ## Feature Flags
//!
//! - `camera` (default): Camera role ([`server`])
//! - `client` (default): Client role ([`client`])
//!
//! ## Modules
//!
//! - [`core`]: Constants, error types and collaborator traits (always included)
//! - [`config`]: Protocol tunables and JSON credential stores
//! - [`crypto`]: AEAD envelope, key agreement and password hashing
//! - [`transport`]: Wire codec, congestion control, routing and sockets
//!
//! ## Example Usage
//!
//! ```rust
//! use camlink::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct StreamSettings {
//!     width: u32,
//!     height: u32,
//! }
//!
//! let settings = StreamSettings { width: 640, height: 480 };
//! let json = settings.to_json().unwrap();
//! assert_eq!(StreamSettings::from_json(&json).unwrap(), settings);
//!
//! let header = Message::new(CameraKind::Frame, 7, 0, Vec::new()).to_bytes();
//! assert_eq!(header.len(), HEADER_SIZE);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod config;
pub mod crypto;
pub mod transport;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Camera API (feature-gated)
#[cfg(feature = "camera")]
#[cfg_attr(docsrs, doc(cfg(feature = "camera")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::config::{ClientCredentials, JsonFileStore, ProtocolConfig, StoredCredential};
    pub use crate::crypto::{BcryptHasher, CredentialHasher};
    pub use crate::transport::{
        CameraKind, CameraPhase, ClientKind, ClientPhase, FramePayload, Message, MessageEncoder,
        TransportError,
    };

    #[cfg(feature = "client")]
    pub use crate::client::{CameraClient, CameraClientBuilder, ClientError, ClientEvent};

    #[cfg(feature = "camera")]
    pub use crate::server::{CameraError, CameraEvent, CameraServer, CameraServerBuilder};
}

// Re-export commonly used items at crate root
pub use config::{ClientCredentials, JsonFileStore, ProtocolConfig, StoredCredential};
pub use core::{ConfigStore, ErrorCategory, LinkError, Settings};
pub use crypto::{BcryptHasher, CredentialHasher};
