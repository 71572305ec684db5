//! Outbound HTTP target for remote lazy execution.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use tracing::{debug, trace};

use conduit_core::{DeferredPayload, LAZY_FUNCTION_HEADER};
use conduit_framework::{InvokeError, InvokeResult, RemoteInvoker};

use crate::error::{TransportError, TransportResult};

/// Posts deferred payloads as JSON to another deployment's deferred path.
///
/// Pair it with [`RemoteLazyRunner`](conduit_framework::RemoteLazyRunner):
///
/// ```rust,ignore
/// let invoker = HttpInvoker::new("https://worker.internal/conduit/lazy", Duration::from_secs(10))?
///     .bearer_token(lazy_token);
/// let dispatcher = Dispatcher::builder()
///     .lazy_runner(RemoteLazyRunner::new(invoker))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpInvoker {
    /// Creates an invoker with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> TransportResult<Self> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(TransportError::InvalidConfig(format!(
                "remote lazy url must be http(s): {}",
                url
            )));
        }
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidConfig(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            bearer_token: None,
        })
    }

    /// Sends `Authorization: Bearer <token>` with every invocation.
    ///
    /// The receiving server refuses deferred payloads without its lazy token.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RemoteInvoker for HttpInvoker {
    async fn invoke(&self, payload: &DeferredPayload) -> InvokeResult {
        let mut req = self.client.post(&self.url).json(payload);
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }

        trace!(
            url = %self.url,
            function = payload.headers.get(LAZY_FUNCTION_HEADER).map(String::as_str).unwrap_or("-"),
            "Posting deferred payload"
        );
        let resp = req.send().await.map_err(|e| InvokeError::transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            debug!(url = %self.url, status = status.as_u16(), "Deferred payload accepted");
            Ok(())
        } else {
            Err(InvokeError::Rejected {
                status: status.as_u16(),
            })
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_urls() {
        let err = HttpInvoker::new("ftp://example.com", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TransportError::InvalidConfig(_)));
    }

    #[test]
    fn test_builds_with_token() {
        let invoker = HttpInvoker::new("https://worker.example.com/lazy", Duration::from_secs(1))
            .unwrap()
            .bearer_token("secret");
        assert_eq!(invoker.url(), "https://worker.example.com/lazy");
        assert_eq!(invoker.bearer_token.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_unreachable_target_is_retryable() {
        // port 9 (discard) on localhost is expected to refuse connections
        let invoker = HttpInvoker::new("http://127.0.0.1:9/lazy", Duration::from_millis(500)).unwrap();
        let payload = conduit_core::DeferredInvocation::snapshot(&conduit_core::Request::new(""), "l", "f").to_payload();
        let err = invoker.invoke(&payload).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
