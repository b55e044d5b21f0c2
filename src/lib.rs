//! camstream - live camera streaming sessions
//!
//! Fetches per-camera bootstrap data from an HTTP bridge, negotiates a
//! WebRTC session with the camera through a WebSocket signaling relay and
//! reports connection state to whatever UI surface embeds it.

pub mod bridge;
pub mod config;
pub mod error;
pub mod media;
pub mod session;
pub mod signaling;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AppError, Result};
pub use session::{ConnectionState, SessionHandle, SessionManager, SessionStatus};
