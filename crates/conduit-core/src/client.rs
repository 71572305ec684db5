//! Outbound platform client handle.
//!
//! The pipeline never calls the platform itself; it only carries a handle
//! supplied by the embedding application so that handlers can reply.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiResult;

/// A handle for calling the chat platform's web API.
///
/// Implementations own their connection pooling; the dispatcher only clones
/// the `Arc` into each request's context.
#[async_trait]
pub trait Client: Send + Sync + 'static {
    /// Calls a raw API method with JSON parameters.
    ///
    /// # Arguments
    ///
    /// * `method` - The API method name (e.g., "chat.postMessage")
    /// * `params` - JSON value containing the parameters
    async fn call_api(&self, method: &str, params: Value) -> ApiResult<Value>;

    /// Returns the token this client authenticates with, if any.
    fn token(&self) -> Option<&str> {
        None
    }

    /// Returns self as an `Arc<dyn Any>` for downcasting to a concrete client.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A boxed Client trait object.
pub type BoxedClient = Arc<dyn Client>;
