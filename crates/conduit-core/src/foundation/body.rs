//! Inbound body decoding.
//!
//! Bodies arrive either as JSON (events API, socket mode) or as
//! form-urlencoded fields (slash commands), where interactive payloads nest a
//! JSON document in a `payload` field. Anything that does not decode into an
//! object yields an empty tree.

use serde_json::{Map, Value};
use tracing::trace;

/// Decoded body tree.
pub type Body = Map<String, Value>;

/// Decodes a raw body, never failing.
pub fn decode_body(raw: &[u8], content_type: Option<&str>) -> Body {
    if raw.is_empty() {
        return Body::new();
    }
    let Ok(text) = std::str::from_utf8(raw) else {
        trace!(len = raw.len(), "Body is not UTF-8, treating as empty");
        return Body::new();
    };

    let media_type = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    if media_type.as_deref() == Some("application/json") || text.trim_start().starts_with('{') {
        return json_object(text);
    }

    let mut form = Body::new();
    for (name, value) in url::form_urlencoded::parse(text.as_bytes()) {
        if name == "payload" {
            return json_object(&value);
        }
        form.insert(name.into_owned(), Value::String(value.into_owned()));
    }
    form
}

fn json_object(text: &str) -> Body {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Body::new(),
        Err(e) => {
            trace!(error = %e, "Malformed JSON body, treating as empty");
            Body::new()
        }
    }
}
