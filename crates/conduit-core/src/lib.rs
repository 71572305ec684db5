//! # Conduit Core
//!
//! The data model of the Conduit event pipeline.
//!
//! This crate holds everything that travels through a dispatch but none of the
//! machinery that moves it:
//!
//! - **Foundation**: [`Request`], [`Response`], [`Context`], header and query
//!   multimaps, body decoding
//! - **Deferred execution**: [`DeferredInvocation`] snapshots and their wire
//!   form [`DeferredPayload`]
//! - **Errors**: the [`DispatchError`] taxonomy and the fatal [`AckBuildError`]
//! - **Client**: the outbound [`Client`] handle carried in each context
//!
//! ## Request lifecycle
//!
//! ```text
//! raw bytes ──▶ Request ──▶ Dispatcher ──▶ Response (ack)
//!                  │
//!                  └──▶ DeferredInvocation ──▶ lazy runner ──▶ Request (lazy-only)
//! ```

pub mod client;
pub mod deferred;
pub mod error;
pub mod foundation;
pub mod retry;

pub use client::{BoxedClient, Client};
pub use deferred::{DEFERRED_METHOD, DeferredInvocation, DeferredPayload, DeferredRequestContext};
pub use error::{
    AckBuildError, ApiError, ApiResult, BoxError, DeferredError, DeferredResult, DispatchError,
    ValidationError,
};
pub use foundation::{
    Body, Context, Headers, LAZY_FUNCTION_HEADER, LAZY_LISTENER_HEADER, LAZY_MARKER_PREFIX,
    LAZY_ONLY_HEADER, MATCHES_KEY, Mode, QueryParams, Request, Response, is_lazy_marker,
};
pub use retry::RetryConfig;

/// Prelude for common imports.
pub mod prelude {
    pub use super::foundation::{Context, Headers, Mode, QueryParams, Request, Response};
    pub use super::{BoxError, Client, DeferredInvocation, DispatchError};
}
