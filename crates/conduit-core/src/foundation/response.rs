//! The outgoing acknowledgment.

use serde::Serialize;
use serde_json::json;

use super::headers::Headers;

const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain;charset=utf-8";

/// Status, body and headers returned to the platform for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
    pub headers: Headers,
}

impl Response {
    /// Creates a response; `content-type` is filled in from the body when absent.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let mut headers = Headers::new();
        headers.insert("content-type", default_content_type(&body));
        Self {
            status,
            body,
            headers,
        }
    }

    /// The "not yet produced" sentinel every request starts with.
    pub fn pending() -> Self {
        Self {
            status: 404,
            body: String::new(),
            headers: Headers::new(),
        }
    }

    /// `200` with an empty body.
    pub fn ok() -> Self {
        Self::new(200, "")
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut resp = Self::new(status, body);
        resp.headers.insert("content-type", TEXT_CONTENT_TYPE);
        resp
    }

    /// Serializes `value` as the body.
    pub fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_string(value)?;
        let mut resp = Self::new(status, body);
        resp.headers.insert("content-type", JSON_CONTENT_TYPE);
        Ok(resp)
    }

    /// `404 {"error":"unhandled request"}`.
    pub fn unhandled() -> Self {
        Self::new(404, json!({"error": "unhandled request"}).to_string())
    }

    /// Generic failure shape: `500` with an empty body.
    pub fn failure() -> Self {
        Self::new(500, "")
    }

    /// `401 {"error":"invalid request"}`.
    pub fn invalid_request() -> Self {
        Self::new(401, json!({"error": "invalid request"}).to_string())
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Whether this is still the untouched sentinel.
    pub fn is_pending(&self) -> bool {
        self.status == 404 && self.body.is_empty() && self.headers.is_empty()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::pending()
    }
}

fn default_content_type(body: &str) -> &'static str {
    if body.starts_with('{') {
        JSON_CONTENT_TYPE
    } else {
        TEXT_CONTENT_TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_content_type() {
        assert_eq!(
            Response::new(200, r#"{"text":"hi"}"#).headers.first("content-type"),
            Some(JSON_CONTENT_TYPE)
        );
        assert_eq!(
            Response::ok().headers.first("Content-Type"),
            Some(TEXT_CONTENT_TYPE)
        );
    }

    #[test]
    fn test_pending_sentinel() {
        let pending = Response::pending();
        assert!(pending.is_pending());
        assert_eq!(pending.status, 404);
        assert!(!Response::unhandled().is_pending());
        assert!(!Response::ok().is_pending());
    }

    #[test]
    fn test_fixed_shapes() {
        assert_eq!(Response::unhandled().body, r#"{"error":"unhandled request"}"#);
        assert_eq!(Response::failure().status, 500);
        assert!(Response::failure().body.is_empty());
        assert_eq!(Response::invalid_request().status, 401);
    }
}
