//! Protocol constants.
//!
//! Wire sizes are fixed by the protocol and MUST NOT be changed. Timing and
//! congestion values are the defaults of [`crate::config::ProtocolConfig`].

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// Connection secret size (AES-128 key, truncated ECDH output).
pub const SECRET_SIZE: usize = 16;

/// Random nonce prepended to every AEAD envelope.
pub const AEAD_NONCE_SIZE: usize = 16;

/// GCM authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// Envelope overhead (nonce + tag) before the ciphertext.
pub const AEAD_OVERHEAD: usize = AEAD_NONCE_SIZE + AEAD_TAG_SIZE;

/// X25519 public key size carried by `auth0`.
pub const PUBLIC_KEY_SIZE: usize = 32;

// =============================================================================
// WIRE HEADER
// =============================================================================

/// Header size: kind (1) + id (4, BE) + timestamp (8, BE).
pub const HEADER_SIZE: usize = 13;

/// Offset of the message id inside the header.
pub const ID_OFFSET: usize = 1;

/// Offset of the timestamp inside the header.
pub const TIMESTAMP_OFFSET: usize = 5;

/// Frame sub-header size inside a decrypted frame: motion (1) + timestamp (8, BE).
pub const FRAME_HEADER_SIZE: usize = 9;

// =============================================================================
// MESSAGE KIND TAGS (client -> camera)
// =============================================================================

/// Unrecognized client message.
pub const CLIENT_TAG_UNKNOWN: u8 = 0;

/// Frame acknowledgement.
pub const CLIENT_TAG_ACK: u8 = 1;

/// Client ephemeral public key.
pub const CLIENT_TAG_AUTH0: u8 = 2;

/// Encrypted password.
pub const CLIENT_TAG_AUTH1: u8 = 3;

/// Encrypted settings update.
pub const CLIENT_TAG_SETTINGS: u8 = 4;

/// Encrypted new password.
pub const CLIENT_TAG_PWD: u8 = 5;

// =============================================================================
// MESSAGE KIND TAGS (camera -> client)
// =============================================================================

/// Unrecognized camera message.
pub const CAMERA_TAG_UNKNOWN: u8 = 255;

/// Camera ephemeral public key.
pub const CAMERA_TAG_AUTH0: u8 = 254;

/// Encrypted settings, sent once the password verified.
pub const CAMERA_TAG_AUTH1: u8 = 253;

/// Encrypted frame.
pub const CAMERA_TAG_FRAME: u8 = 252;

// =============================================================================
// CONGESTION CONTROL
// =============================================================================

/// Frames held in the send queue before it is halved.
pub const MAX_QUEUE_LENGTH: usize = 30;

/// Gain for the smoothed RTT average (0 < gain < 1).
pub const RTT_GAIN: f64 = 0.125;

/// Gain for the mean deviation estimate (0 < gain < 1).
pub const DEV_GAIN: f64 = 0.25;

/// Smallest send window.
pub const MIN_WINDOW: u32 = 1;

/// Floor for the pacing timer when `rto_interval` is still near zero.
pub const MIN_PACING_INTERVAL: Duration = Duration::from_millis(1);

// =============================================================================
// TIMING
// =============================================================================

/// Peers that are not authenticated after this long are closed by the camera.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Camera closes the connection when no ack arrived for this long.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Client closes the connection when no frame arrived for this long.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed part of the client reconnect delay.
pub const RECONNECT_BASE: Duration = Duration::from_millis(2000);

/// Upper bound of the random part of the client reconnect delay.
pub const RECONNECT_JITTER: Duration = Duration::from_millis(1000);

/// Client waits this long after a password rotation before reconnecting.
pub const PASSWORD_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Camera waits this long after a password rotation before listening again.
pub const RESTART_DELAY: Duration = Duration::from_secs(3);
