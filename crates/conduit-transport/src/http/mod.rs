//! HTTP transports: the inbound event server and the outbound remote lazy target.

#[cfg(feature = "http-client")]
mod client;
#[cfg(feature = "http-client")]
pub use client::HttpInvoker;

#[cfg(feature = "http-server")]
mod server;
#[cfg(feature = "http-server")]
pub use server::{EventServerConfig, ServerHandle, router, serve};
