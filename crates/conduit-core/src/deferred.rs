//! Serializable snapshots for deferred (lazy) execution.
//!
//! A [`DeferredInvocation`] carries only plain data (headers, query, raw
//! body and correlation metadata), never live handles. In-process runners
//! rebuild a [`Request`] from it directly; remote runners ship it as a
//! [`DeferredPayload`], the API-gateway-style JSON document below:
//!
//! ```text
//! {
//!   "method": "NONE",
//!   "headers": {
//!     "x-conduit-lazy-only": "1",
//!     "x-conduit-lazy-listener-name": "mention",
//!     "x-conduit-lazy-function-name": "notify",
//!     ...
//!   },
//!   "multiValueHeaders": {...},
//!   "queryStringParameters": {...},
//!   "multiValueQueryStringParameters": {...},
//!   "body": "<raw body>",
//!   "isBase64Encoded": false,
//!   "requestContext": {"requestId": "...", "mode": "http"}
//! }
//! ```

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{DeferredError, DeferredResult};
use crate::foundation::headers::{Headers, QueryParams};
use crate::foundation::request::{
    LAZY_FUNCTION_HEADER, LAZY_LISTENER_HEADER, LAZY_ONLY_HEADER, Mode, Request,
};

/// HTTP method recorded in deferred payloads; there is no real HTTP call.
pub const DEFERRED_METHOD: &str = "NONE";

/// A request snapshot addressed to one lazy function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredInvocation {
    /// Listener that declared the function; absent in payloads from older senders.
    pub listener: Option<String>,
    /// Name of the lazy function to run.
    pub function: String,
    /// Request id of the originating request.
    pub request_id: String,
    /// Headers, including the lazy markers.
    pub headers: Headers,
    pub query: QueryParams,
    /// Raw body, byte for byte.
    pub body: Bytes,
    pub mode: Mode,
}

impl DeferredInvocation {
    /// Snapshots `request` for the lazy function `function` of `listener`.
    ///
    /// The copy carries the lazy markers so the receiving side skips matching
    /// and never schedules further lazy work.
    pub fn snapshot(request: &Request, listener: &str, function: &str) -> Self {
        let mut headers = request.headers().clone();
        headers.insert(LAZY_ONLY_HEADER, "1");
        if !listener.is_empty() {
            headers.insert(LAZY_LISTENER_HEADER, listener);
        }
        headers.insert(LAZY_FUNCTION_HEADER, function);
        Self {
            listener: (!listener.is_empty()).then(|| listener.to_owned()),
            function: function.to_owned(),
            request_id: request.context().request_id().to_owned(),
            headers,
            query: request.query().clone(),
            body: request.raw_body().clone(),
            mode: request.mode(),
        }
    }

    /// Rebuilds a fresh request from the snapshot, tagged lazy-only.
    ///
    /// This is the only way to obtain a lazy-only request.
    pub fn into_request(self) -> Request {
        let mut request = Request::new(self.body)
            .with_headers(self.headers)
            .with_query(self.query)
            .with_mode(self.mode);
        request.mark_lazy_only(self.listener, self.function);
        request.context_mut().set_request_id(self.request_id);
        request
    }

    /// Wire form for remote runners.
    pub fn to_payload(&self) -> DeferredPayload {
        let (body, is_base64_encoded) = match std::str::from_utf8(&self.body) {
            Ok(text) => (text.to_owned(), false),
            Err(_) => (STANDARD.encode(&self.body), true),
        };
        DeferredPayload {
            method: DEFERRED_METHOD.to_owned(),
            headers: self.headers.to_single(),
            multi_value_headers: self.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            query_string_parameters: self.query.to_single(),
            multi_value_query_string_parameters: self
                .query
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body,
            is_base64_encoded,
            request_context: DeferredRequestContext {
                request_id: self.request_id.clone(),
                mode: self.mode,
            },
        }
    }

    /// Reads a snapshot back from its wire form.
    pub fn from_payload(payload: DeferredPayload) -> DeferredResult<Self> {
        let body = if payload.is_base64_encoded {
            Bytes::from(STANDARD.decode(payload.body.as_bytes())?)
        } else {
            Bytes::from(payload.body)
        };

        // multi-value maps are authoritative; single-value maps cover
        // senders that only fill those
        let headers = if payload.multi_value_headers.is_empty() {
            payload.headers.into_iter().collect::<Headers>()
        } else {
            Headers::from(payload.multi_value_headers)
        };
        let query = if payload.multi_value_query_string_parameters.is_empty() {
            payload.query_string_parameters.into_iter().collect::<QueryParams>()
        } else {
            QueryParams::from(payload.multi_value_query_string_parameters)
        };

        let function = headers
            .first(LAZY_FUNCTION_HEADER)
            .filter(|f| !f.is_empty())
            .map(str::to_owned)
            .ok_or(DeferredError::MissingFunction)?;
        let listener = headers
            .first(LAZY_LISTENER_HEADER)
            .filter(|l| !l.is_empty())
            .map(str::to_owned);

        Ok(Self {
            listener,
            function,
            request_id: payload.request_context.request_id,
            headers,
            query,
            body,
            mode: payload.request_context.mode,
        })
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_payload())
    }

    pub fn from_json(bytes: &[u8]) -> DeferredResult<Self> {
        let payload: DeferredPayload = serde_json::from_slice(bytes)?;
        Self::from_payload(payload)
    }
}

/// Serialized form of a [`DeferredInvocation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredPayload {
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub multi_value_headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub query_string_parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub multi_value_query_string_parameters: BTreeMap<String, Vec<String>>,
    pub body: String,
    #[serde(default)]
    pub is_base64_encoded: bool,
    #[serde(default)]
    pub request_context: DeferredRequestContext,
}

/// Correlation metadata carried alongside the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredRequestContext {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub mode: Mode,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn sample_request() -> Request {
        let mut req = Request::new(r#"{"type":"event_callback","event":{"type":"app_mention","text":"hi"}}"#)
            .with_headers(
                Headers::new()
                    .with("Content-Type", "application/json")
                    .with("X-Slack-Request-Timestamp", "1700000000"),
            )
            .with_query(QueryParams::parse("a=1&a=2&b=x"));
        req.context_mut().set_request_id("req-1");
        req
    }

    #[test]
    fn test_snapshot_over_the_wire_reconstructs_request() {
        let original = sample_request();
        let snapshot = DeferredInvocation::snapshot(&original, "mention", "notify");

        let wire = snapshot.to_json().unwrap();
        let decoded = DeferredInvocation::from_json(&wire).unwrap();
        assert_eq!(decoded, snapshot);

        let rebuilt = decoded.into_request();
        assert_eq!(rebuilt.raw_body(), original.raw_body());
        assert_eq!(rebuilt.body(), original.body());
        assert_eq!(rebuilt.query(), original.query());
        assert_eq!(rebuilt.headers(), &snapshot.headers);
        assert_eq!(rebuilt.context().request_id(), "req-1");
        assert!(rebuilt.is_lazy_only());
        assert_eq!(rebuilt.lazy_listener_name(), Some("mention"));
        assert_eq!(rebuilt.lazy_function_name(), Some("notify"));
    }

    #[test]
    fn test_payload_shape() {
        let snapshot = DeferredInvocation::snapshot(&sample_request(), "mention", "notify");
        let value: Value = serde_json::from_slice(&snapshot.to_json().unwrap()).unwrap();

        assert_eq!(value["method"], "NONE");
        assert_eq!(value["isBase64Encoded"], false);
        assert_eq!(value["headers"][LAZY_ONLY_HEADER], "1");
        assert_eq!(value["headers"][LAZY_LISTENER_HEADER], "mention");
        assert_eq!(value["headers"][LAZY_FUNCTION_HEADER], "notify");
        assert_eq!(value["queryStringParameters"]["a"], "1");
        assert_eq!(value["multiValueQueryStringParameters"]["a"], json!(["1", "2"]));
    }

    #[test]
    fn test_binary_body_is_base64() {
        let req = Request::new(vec![0xde, 0xad, 0xbe, 0xef]);
        let snapshot = DeferredInvocation::snapshot(&req, "l", "f");
        let payload = snapshot.to_payload();
        assert!(payload.is_base64_encoded);

        let back = DeferredInvocation::from_payload(payload).unwrap();
        assert_eq!(back.body.as_ref(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_missing_function_is_rejected() {
        let payload = json!({"method": "NONE", "headers": {}, "body": "{}"});
        let err = DeferredInvocation::from_json(payload.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, DeferredError::MissingFunction));
    }

    #[test]
    fn test_payload_without_listener_still_decodes() {
        let payload = json!({
            "method": "NONE",
            "headers": {LAZY_ONLY_HEADER: "1", LAZY_FUNCTION_HEADER: "notify"},
            "body": "{}",
        });
        let invocation = DeferredInvocation::from_json(payload.to_string().as_bytes()).unwrap();
        assert_eq!(invocation.listener, None);

        let rebuilt = invocation.into_request();
        assert!(rebuilt.is_lazy_only());
        assert_eq!(rebuilt.lazy_listener_name(), None);
        assert_eq!(rebuilt.lazy_function_name(), Some("notify"));
    }
}
