//! Built-in global middleware.
//!
//! The dispatcher installs these ahead of user middleware, in this order:
//!
//! 1. [`SslCheck`] answers platform SSL probes.
//! 2. [`RequestVerification`] checks the signature over the raw body.
//! 3. [`UrlVerification`] answers endpoint challenges.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{debug, info, warn};

use conduit_core::{Mode, Request, Response, ValidationError};

use crate::handler::HandlerResult;
use crate::middleware::{Middleware, Next};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the request timestamp (seconds since the epoch).
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";

/// Header carrying the `v0=<hex>` signature.
pub const SIGNATURE_HEADER: &str = "x-slack-signature";

fn is_ssl_check(req: &Request) -> bool {
    req.body().get("ssl_check").and_then(Value::as_str) == Some("1")
}

// ============================================================================
// SslCheck
// ============================================================================

/// Answers `ssl_check=1` probes and enforces the legacy verification token.
#[derive(Debug, Clone, Default)]
pub struct SslCheck {
    verification_token: Option<String>,
}

impl SslCheck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects bodies whose `token` field differs from `token`.
    pub fn verification_token(mut self, token: impl Into<String>) -> Self {
        self.verification_token = Some(token.into());
        self
    }
}

#[async_trait]
impl Middleware for SslCheck {
    async fn process(
        &self,
        req: &mut Request,
        resp: Response,
        next: Next<'_>,
    ) -> HandlerResult<Response> {
        if is_ssl_check(req) {
            debug!("Answering SSL check");
            return Ok(Response::ok());
        }
        if let Some(expected) = &self.verification_token
            && let Some(token) = req.body().get("token").and_then(Value::as_str)
            && token != expected
        {
            warn!("Verification token mismatch");
            return Ok(Response::new(
                401,
                json!({"error": "invalid verification token"}).to_string(),
            ));
        }
        next.run(req, resp).await
    }

    fn name(&self) -> &str {
        "ssl_check"
    }
}

// ============================================================================
// RequestVerification
// ============================================================================

/// Verifies the HMAC-SHA256 signature of HTTP requests.
///
/// The signed base string is `v0:{timestamp}:{raw body}`. Requests whose
/// timestamp is further than the tolerance from now are rejected to stop
/// replays. Socket-mode requests and SSL checks are not signed and pass.
#[derive(Debug, Clone)]
pub struct RequestVerification {
    signing_secret: String,
    tolerance_secs: u64,
}

impl RequestVerification {
    pub fn new(signing_secret: impl Into<String>) -> Self {
        Self {
            signing_secret: signing_secret.into(),
            tolerance_secs: 300,
        }
    }

    pub fn tolerance_secs(mut self, secs: u64) -> Self {
        self.tolerance_secs = secs;
        self
    }

    /// Computes the `v0=<hex>` signature for a timestamp and body.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> String {
        let mut mac = match HmacSha256::new_from_slice(self.signing_secret.as_bytes()) {
            Ok(m) => m,
            // HMAC accepts keys of any length
            Err(_) => return String::new(),
        };
        mac.update(b"v0:");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    /// Checks the timestamp and signature headers of `req`.
    pub fn verify(&self, req: &Request) -> Result<(), ValidationError> {
        let headers = req.headers();
        let timestamp = headers
            .first(TIMESTAMP_HEADER)
            .ok_or_else(|| ValidationError("missing timestamp header".into()))?;
        let signature = headers
            .first(SIGNATURE_HEADER)
            .ok_or_else(|| ValidationError("missing signature header".into()))?;

        let ts: u64 = timestamp
            .parse()
            .map_err(|_| ValidationError(format!("malformed timestamp: {timestamp}")))?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        if now.abs_diff(ts) > self.tolerance_secs {
            return Err(ValidationError("stale timestamp".into()));
        }

        let expected = self.sign(timestamp, req.raw_body());
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(ValidationError("signature mismatch".into()));
        }
        Ok(())
    }
}

/// Compares two secrets without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl Middleware for RequestVerification {
    async fn process(
        &self,
        req: &mut Request,
        resp: Response,
        next: Next<'_>,
    ) -> HandlerResult<Response> {
        if req.mode() == Mode::Socket || is_ssl_check(req) {
            return next.run(req, resp).await;
        }
        self.verify(req)?;
        next.run(req, resp).await
    }

    fn name(&self) -> &str {
        "request_verification"
    }
}

// ============================================================================
// UrlVerification
// ============================================================================

/// Answers `url_verification` challenges by echoing the challenge.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlVerification;

#[async_trait]
impl Middleware for UrlVerification {
    async fn process(
        &self,
        req: &mut Request,
        resp: Response,
        next: Next<'_>,
    ) -> HandlerResult<Response> {
        if req.payload_type() == Some("url_verification") {
            let challenge = req.body().get("challenge").cloned().unwrap_or(Value::Null);
            info!("Answering URL verification challenge");
            return Ok(Response::json(200, &json!({ "challenge": challenge }))?);
        }
        next.run(req, resp).await
    }

    fn name(&self) -> &str {
        "url_verification"
    }
}
