//! Frame sub-header carried inside the encrypted `frame` payload.
//!
//! ```text
//! +--------+-----------------------------+-----------------+
//! | Motion | Capture Timestamp           | Frame Bytes...  |
//! | 1 byte | 8 bytes (BE64, ms)          |                 |
//! +--------+-----------------------------+-----------------+
//! ```

use crate::core::{FRAME_HEADER_SIZE, ProtocolError};

/// A captured frame with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePayload {
    /// Whether motion was detected in this frame.
    pub motion: bool,
    /// Capture time chosen by the camera application.
    pub timestamp: u64,
    /// Raw frame bytes.
    pub data: Vec<u8>,
}

impl FramePayload {
    /// Create a frame payload.
    pub fn new(data: Vec<u8>, timestamp: u64, motion: bool) -> Self {
        Self {
            motion,
            timestamp,
            data,
        }
    }

    /// Serialize sub-header and frame bytes (the plaintext to encrypt).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + self.data.len());
        buf.push(u8::from(self.motion));
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Parse a decrypted frame. Only a motion byte of exactly 1 reads as
    /// motion.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort {
                expected: FRAME_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&bytes[1..FRAME_HEADER_SIZE]);

        Ok(Self {
            motion: bytes[0] == 1,
            timestamp: u64::from_be_bytes(timestamp),
            data: bytes[FRAME_HEADER_SIZE..].to_vec(),
        })
    }
}
