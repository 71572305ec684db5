//! WebSocket transports.

#[cfg(feature = "ws-client")]
mod client;
#[cfg(feature = "ws-client")]
pub use client::{SocketModeClient, SocketModeConfig, SocketModeHandle};
