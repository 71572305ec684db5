//! Conduit Runtime - configuration, logging and process orchestration.
//!
//! This crate provides:
//! - Layered configuration (`ConduitConfig`, `ConfigLoader`)
//! - Logging setup on `tracing-subscriber` (`LoggingBuilder`)
//! - The process orchestrator (`ConduitRuntime`)
//!
//! # Transports
//!
//! Which transports the runtime can start depends on enabled cargo features:
//!
//! - `http-server`: the event endpoint, started when `server.enabled` is set
//! - `ws-client`: the socket-mode client, started when `[socket_mode]` is present
//! - `http-client`: the HTTP invoker behind `lazy.runner = "remote"`
//!
//! ```ignore
//! use conduit_runtime::ConduitRuntime;
//!
//! #[tokio::main]
//! async fn main() -> conduit_runtime::RuntimeResult<()> {
//!     ConduitRuntime::new()
//!         .listener(my_listener())
//!         .run()
//!         .await
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{
    ConduitConfig, ConfigError, ConfigLoader, ConfigResult, LazyRunnerKind, validate_config,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{ConduitRuntime, RuntimeBuilder, lazy_runner_from_config};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros and span helpers.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
