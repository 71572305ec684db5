//! # Conduit
//!
//! An inbound-event dispatch pipeline for chat-platform bots.
//!
//! ## Overview
//!
//! Conduit takes a request from the platform (an HTTP webhook or a
//! socket-mode envelope), runs it through middleware, routes it to the first
//! matching listener, and guarantees an acknowledgment. Work that does not fit
//! in the acknowledgment window is declared as *lazy* functions, which run
//! after the ack on a task, a thread or a remote worker.
//!
//! ```text
//! ┌───────────┐     ┌────────────┐     ┌────────────┐     ┌──────────┐
//! │ Transport │────▶│ Middleware │────▶│  Listener  │────▶│   Ack    │──▶ platform
//! │ HTTP / WS │     │  (global)  │     │ (1st match)│     └──────────┘
//! └───────────┘     └────────────┘     └─────┬──────┘
//!                                            └────────▶ LazyRunner ──▶ lazy functions
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conduit::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> RuntimeResult<()> {
//!     let deploy = Listener::new("deploy", Matcher::command("/deploy"))
//!         .handler(|args| Box::pin(async move {
//!             args.ack.ack_text("Deploying...");
//!             Ok(())
//!         }))
//!         .lazy("run_deploy", |req| async move {
//!             // long-running work
//!             Ok(())
//!         });
//!
//!     ConduitRuntime::new().listener(deploy).run().await
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` / `yaml-config`: configuration file formats
//! - `json-log`: JSON log output
//! - `http-server`: the event endpoint
//! - `ws-client`: the socket-mode client
//! - `http-client`: remote lazy execution over HTTP

pub use conduit_core as core;
pub use conduit_framework as framework;
pub use conduit_runtime as runtime;
pub use conduit_transport as transport;

/// Commonly used types for building apps.
///
/// ```rust,ignore
/// use conduit::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use conduit_runtime::{ConduitConfig, ConduitRuntime, RuntimeError, RuntimeResult};

    // Request model
    pub use conduit_core::{
        BoxError, Client, DeferredInvocation, Headers, Mode, QueryParams, Request, Response,
        RetryConfig,
    };

    // Routing and handlers
    pub use conduit_framework::{
        Ack, Dispatcher, HandlerArgs, HandlerResult, LazyFunction, Listener, Matcher, Middleware,
        Next, completion_fn, middleware_fn, named_middleware_fn,
    };

    // Lazy execution
    pub use conduit_framework::{
        LazyRunner, QueueInvoker, RemoteInvoker, RemoteLazyRunner, TaskLazyRunner,
        ThreadLazyRunner, consume_queue,
    };
}
