//! Camlink - Client Role
//!
//! Reconnecting endpoint that authenticates with a stored password, acks and
//! decrypts frames, and rotates the password on request.

#[allow(clippy::module_inception)]
mod client;
mod session;

pub use client::{CameraClient, CameraClientBuilder, ClientError, ClientEvent};
