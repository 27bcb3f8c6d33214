//! Camlink - Camera Role
//!
//! Listening endpoint that authenticates a single client and streams frames
//! to it under congestion control.

#[allow(clippy::module_inception)]
mod server;
mod session;

pub use server::{CameraConfig, CameraError, CameraEvent, CameraServer, CameraServerBuilder};
