//! Foundation layer - the per-request data model.
//!
//! - [`Request`]: raw body, lazily decoded body, headers, query, context, mode
//! - [`Response`]: status, body, headers; starts as a "not produced" sentinel
//! - [`Context`]: per-request key/value bag with derived routing identifiers

pub mod body;
pub mod context;
pub mod extract;
pub mod headers;
pub mod request;
pub mod response;

pub use body::{Body, decode_body};
pub use context::{Context, MATCHES_KEY};
pub use headers::{Headers, QueryParams};
pub use request::{
    LAZY_FUNCTION_HEADER, LAZY_LISTENER_HEADER, LAZY_MARKER_PREFIX, LAZY_ONLY_HEADER, Mode, Request,
    is_lazy_marker,
};
pub use response::Response;
