//! Unified error types for the Conduit pipeline.
//!
//! [`DispatchError`] is the recoverable taxonomy: every variant is turned
//! into a [`Response`](crate::Response) at the dispatcher boundary.
//! [`AckBuildError`] is the one failure that escapes to the transport.

use thiserror::Error;

/// Boxed error returned by handlers, middleware and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Classified failure observed while dispatching one request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Signature or timestamp on an inbound event did not verify.
    #[error("request validation failed: {reason}")]
    Validation {
        /// Why verification rejected the request.
        reason: String,
    },

    /// No registered listener accepted the request.
    #[error("unhandled request")]
    Unhandled,

    /// A listener's handler (or its middleware) failed.
    #[error("listener '{listener}' failed: {source}")]
    Listener {
        /// Name of the listener that failed.
        listener: String,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },

    /// A global middleware failed before any listener was selected.
    #[error("middleware failed: {0}")]
    Middleware(#[source] BoxError),

    /// A deferred handler failed.
    #[error("lazy function '{function}' failed: {source}")]
    LazyExecution {
        /// Name of the lazy function.
        function: String,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },
}

impl DispatchError {
    /// Creates a validation error with the given reason.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Short machine-friendly label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Unhandled => "unhandled",
            Self::Listener { .. } => "listener",
            Self::Middleware(_) => "middleware",
            Self::LazyExecution { .. } => "lazy_execution",
        }
    }
}

/// Returned by middleware to reject a request as unverifiable.
///
/// The dispatcher classifies it as [`DispatchError::Validation`].
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Failure while building the acknowledgment itself.
///
/// No response can be guaranteed, so this propagates to the caller.
#[derive(Debug, Error)]
pub enum AckBuildError {
    /// The acknowledgment body could not be serialized.
    #[error("failed to serialize acknowledgment body: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The acknowledgment was rejected while being assembled.
    #[error("invalid acknowledgment: {0}")]
    Invalid(String),
}

// =============================================================================
// Deferred Payload Errors
// =============================================================================

/// Errors decoding a serialized deferred invocation.
#[derive(Debug, Error)]
pub enum DeferredError {
    /// The payload was not valid JSON of the expected shape.
    #[error("malformed deferred payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The body claimed base64 encoding but did not decode.
    #[error("invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The payload names no lazy function to run.
    #[error("deferred payload is missing the lazy function name")]
    MissingFunction,
}

// =============================================================================
// API Errors
// =============================================================================

/// Error type for outbound calls made through a [`Client`](crate::Client).
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No credentials are available for the call.
    #[error("client has no token")]
    NoToken,
    /// The API call timed out.
    #[error("API call timed out")]
    Timeout,
    /// The platform returned an error.
    #[error("API error: {0}")]
    Platform(String),
    /// Failed to serialize/deserialize.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for deferred payload decoding.
pub type DeferredResult<T> = Result<T, DeferredError>;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;
