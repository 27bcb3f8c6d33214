//! Message encoding and decoding.
//!
//! Every protocol message is one binary transport message:
//!
//! ```text
//! +--------+-------------------+-----------------------------+------------+
//! | Kind   | Message Id        | Timestamp                   | Payload... |
//! | 1 byte | 4 bytes (BE32)    | 8 bytes (BE64, ms, epoch)   |            |
//! +--------+-------------------+-----------------------------+------------+
//! ```
//!
//! The two directions carry disjoint vocabularies, so the codec is generic
//! over the [`MessageKind`] of the direction: [`ClientKind`] for
//! client → camera and [`CameraKind`] for camera → client.

use std::fmt;
use std::marker::PhantomData;

use thiserror::Error;

use super::timing::unix_millis;
use crate::core::{
    CAMERA_TAG_AUTH0, CAMERA_TAG_AUTH1, CAMERA_TAG_FRAME, CAMERA_TAG_UNKNOWN, CLIENT_TAG_ACK,
    CLIENT_TAG_AUTH0, CLIENT_TAG_AUTH1, CLIENT_TAG_PWD, CLIENT_TAG_SETTINGS, CLIENT_TAG_UNKNOWN,
    HEADER_SIZE, ID_OFFSET, TIMESTAMP_OFFSET,
};

/// Tag enumeration for one direction of the protocol.
pub trait MessageKind: Copy + Eq + fmt::Debug + fmt::Display + Send + 'static {
    /// Map a leading tag byte to a kind. Unrecognized bytes map to the
    /// direction's `Unknown` kind instead of failing.
    fn from_byte(byte: u8) -> Self;

    /// Tag byte written on the wire.
    fn as_byte(self) -> u8;
}

/// Messages sent by the client to the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientKind {
    /// Unrecognized tag.
    Unknown = CLIENT_TAG_UNKNOWN,
    /// Acknowledges the frame whose id is in the header.
    Ack = CLIENT_TAG_ACK,
    /// Client ephemeral public key.
    Auth0 = CLIENT_TAG_AUTH0,
    /// Encrypted password.
    Auth1 = CLIENT_TAG_AUTH1,
    /// Encrypted settings update.
    Settings = CLIENT_TAG_SETTINGS,
    /// Encrypted new password.
    Pwd = CLIENT_TAG_PWD,
}

impl MessageKind for ClientKind {
    fn from_byte(byte: u8) -> Self {
        match byte {
            CLIENT_TAG_ACK => Self::Ack,
            CLIENT_TAG_AUTH0 => Self::Auth0,
            CLIENT_TAG_AUTH1 => Self::Auth1,
            CLIENT_TAG_SETTINGS => Self::Settings,
            CLIENT_TAG_PWD => Self::Pwd,
            _ => Self::Unknown,
        }
    }

    fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Ack => "ack",
            Self::Auth0 => "auth0",
            Self::Auth1 => "auth1",
            Self::Settings => "settings",
            Self::Pwd => "pwd",
        };
        f.write_str(name)
    }
}

/// Messages sent by the camera to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CameraKind {
    /// Unrecognized tag.
    Unknown = CAMERA_TAG_UNKNOWN,
    /// Camera ephemeral public key.
    Auth0 = CAMERA_TAG_AUTH0,
    /// Encrypted settings.
    Auth1 = CAMERA_TAG_AUTH1,
    /// Encrypted frame.
    Frame = CAMERA_TAG_FRAME,
}

impl MessageKind for CameraKind {
    fn from_byte(byte: u8) -> Self {
        match byte {
            CAMERA_TAG_AUTH0 => Self::Auth0,
            CAMERA_TAG_AUTH1 => Self::Auth1,
            CAMERA_TAG_FRAME => Self::Frame,
            _ => Self::Unknown,
        }
    }

    fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for CameraKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Auth0 => "auth0",
            Self::Auth1 => "auth1",
            Self::Frame => "frame",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while decoding a message.
#[derive(Debug, Error)]
pub enum MessageError {
    /// Fewer bytes than the fixed header.
    #[error("message too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },
}

/// A decoded (or freshly encoded) protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<K: MessageKind> {
    /// Per-connection, per-direction counter.
    pub id: u32,
    /// Send time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Message kind.
    pub kind: K,
    /// Payload following the header.
    pub payload: Vec<u8>,
}

impl<K: MessageKind> Message<K> {
    /// Build a message with explicit header fields.
    pub fn new(kind: K, id: u32, timestamp: u64, payload: Vec<u8>) -> Self {
        Self {
            id,
            timestamp,
            kind,
            payload,
        }
    }

    /// Serialize header and payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.push(self.kind.as_byte());
        buf.extend_from_slice(&self.id.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a message, mapping unknown tags to the direction's unknown kind.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.len() < HEADER_SIZE {
            return Err(MessageError::TooShort {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let kind = K::from_byte(bytes[0]);

        let mut id_bytes = [0u8; 4];
        id_bytes.copy_from_slice(&bytes[ID_OFFSET..TIMESTAMP_OFFSET]);

        let mut timestamp_bytes = [0u8; 8];
        timestamp_bytes.copy_from_slice(&bytes[TIMESTAMP_OFFSET..HEADER_SIZE]);

        Ok(Self {
            id: u32::from_be_bytes(id_bytes),
            timestamp: u64::from_be_bytes(timestamp_bytes),
            kind,
            payload: bytes[HEADER_SIZE..].to_vec(),
        })
    }
}

impl Message<ClientKind> {
    /// Acknowledgement for a received frame: header only, carrying the
    /// frame's id. Acks do not consume the sender's id counter.
    pub fn ack(frame_id: u32) -> Self {
        Self::new(ClientKind::Ack, frame_id, unix_millis(), Vec::new())
    }
}

/// Assigns ids and timestamps to outgoing messages of one direction.
#[derive(Debug, Clone)]
pub struct MessageEncoder<K: MessageKind> {
    last_id: u32,
    _kind: PhantomData<K>,
}

impl<K: MessageKind> Default for MessageEncoder<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MessageKind> MessageEncoder<K> {
    /// Create an encoder; the first message gets id 1.
    pub fn new() -> Self {
        Self {
            last_id: 0,
            _kind: PhantomData,
        }
    }

    /// Id of the last encoded message.
    pub fn last_id(&self) -> u32 {
        self.last_id
    }

    /// Encode with the current wall-clock time.
    pub fn encode(&mut self, kind: K, payload: Vec<u8>) -> Message<K> {
        self.encode_at(kind, payload, unix_millis())
    }

    /// Encode with an explicit timestamp. Ids wrap to 0 after `u32::MAX`.
    pub fn encode_at(&mut self, kind: K, payload: Vec<u8>, timestamp: u64) -> Message<K> {
        self.last_id = self.last_id.wrapping_add(1);
        Message::new(kind, self.last_id, timestamp, payload)
    }
}
