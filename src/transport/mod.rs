//! Camlink - Transport Layer
//!
//! Everything between the application roles and the WebSocket:
//!
//! - **Message codec**: [`Message`], [`MessageEncoder`] and the two
//!   direction-specific kind enums [`ClientKind`] / [`CameraKind`]
//! - **Frame sub-header**: [`FramePayload`]
//! - **RTT estimation**: [`RttEstimator`] (Jacobson, SIGCOMM 1988)
//! - **Congestion control**: [`CongestionController`] with its
//!   [`SendQueue`] and in-flight tracking
//! - **Routing**: phase-based admission with [`admit_at_camera`] and
//!   [`admit_at_client`]
//! - **Sockets**: [`MessageSink`] / [`MessageSource`] over tokio-tungstenite
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Camera / Client roles            │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │  codec, congestion, routing, sockets    │
//! ├─────────────────────────────────────────┤
//! │   Crypto (ECDH handshake, AES-GCM)      │
//! ├─────────────────────────────────────────┤
//! │            WebSocket                    │
//! └─────────────────────────────────────────┘
//! ```

mod congestion;
mod connection;
mod error;
mod message;
mod payload;
mod router;
mod socket;
mod timing;

pub use congestion::{AckOutcome, CongestionController, CongestionState, InFlightRecord, SendQueue};
pub use connection::{CameraPhase, ClientPhase, ConnectionId, ConnectionIds};
pub use error::{TransportError, TransportResult};
pub use message::{CameraKind, ClientKind, Message, MessageEncoder, MessageError, MessageKind};
pub use payload::FramePayload;
pub use router::{admit_at_camera, admit_at_client};
pub use socket::{
    AcceptedStream, DialedStream, MessageSink, MessageSource, accept, connect, split,
};
pub use timing::{RttEstimator, Timer, arm, expired, unix_millis};
