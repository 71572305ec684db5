//! # Conduit Transport
//!
//! Wire adapters that feed a [`Dispatcher`](conduit_framework::Dispatcher).
//!
//! Each transport is behind a feature flag:
//!
//! - `http-server`: axum server exposing the events path and the deferred
//!   invocation path
//! - `http-client`: [`HttpInvoker`], a reqwest target for
//!   [`RemoteLazyRunner`](conduit_framework::RemoteLazyRunner)
//! - `ws-client`: socket-mode client that acknowledges each envelope on the
//!   socket it arrived on
//! - `full`: all of the above
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  Listeners / lazy fn │  (user code)
//! ├──────────────────────┤
//! │  conduit-framework   │  Dispatcher, lazy runners
//! ├──────────────────────┤
//! │  conduit-transport   │  <- This crate
//! ├──────────────────────┤
//! │  Network (HTTP / WS) │
//! └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conduit_transport::http::{EventServerConfig, serve};
//!
//! let config = EventServerConfig::new("0.0.0.0:3000")
//!     .lazy_path("/lazy")
//!     .lazy_token(std::env::var("LAZY_TOKEN")?);
//! let handle = serve(dispatcher, config).await?;
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await;
//! ```

pub mod error;

#[cfg(any(feature = "http-client", feature = "http-server"))]
pub mod http;

#[cfg(feature = "ws-client")]
pub mod websocket;

pub use error::{TransportError, TransportResult};

#[cfg(feature = "http-server")]
pub use http::{EventServerConfig, ServerHandle};

#[cfg(feature = "http-client")]
pub use http::HttpInvoker;

#[cfg(feature = "ws-client")]
pub use websocket::{SocketModeClient, SocketModeConfig, SocketModeHandle};
