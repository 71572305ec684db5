//! Derivation of routing identifiers from a decoded body.
//!
//! Each extractor walks the shapes the platform actually sends (events API
//! envelopes, interactive payloads, slash commands) and returns `None` when
//! the body does not carry the field.

use serde_json::{Map, Value};

type Object = Map<String, Value>;

/// Reads `field` as a string, or as an object's `id`.
fn string_or_id<'a>(payload: &'a Object, field: &str) -> Option<&'a str> {
    match payload.get(field)? {
        Value::String(s) => Some(s),
        Value::Object(obj) => obj.get("id").and_then(Value::as_str),
        _ => None,
    }
}

fn nested<'a>(payload: &'a Object, field: &str) -> Option<&'a Object> {
    payload.get(field).and_then(Value::as_object)
}

fn first_authorization(payload: &Object) -> Option<&Object> {
    payload
        .get("authorizations")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(Value::as_object)
}

pub fn is_enterprise_install(payload: &Object) -> bool {
    if let Some(auth) = first_authorization(payload) {
        return is_enterprise_install(auth);
    }
    match payload.get("is_enterprise_install") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

pub fn enterprise_id(payload: &Object) -> Option<String> {
    if let Some(id) = string_or_id(payload, "enterprise") {
        return Some(id.to_owned());
    }
    if let Some(auth) = first_authorization(payload) {
        return enterprise_id(auth);
    }
    if let Some(id) = payload.get("enterprise_id").and_then(Value::as_str) {
        return Some(id.to_owned());
    }
    if let Some(id) = nested(payload, "team")
        .and_then(|t| t.get("enterprise_id"))
        .and_then(Value::as_str)
    {
        return Some(id.to_owned());
    }
    nested(payload, "event").and_then(enterprise_id)
}

pub fn team_id(payload: &Object) -> Option<String> {
    if let Some(id) = nested(payload, "view")
        .and_then(|v| v.get("app_installed_team_id"))
        .and_then(Value::as_str)
    {
        return Some(id.to_owned());
    }
    if let Some(id) = string_or_id(payload, "team") {
        return Some(id.to_owned());
    }
    if let Some(auth) = first_authorization(payload) {
        return team_id(auth);
    }
    if let Some(id) = payload.get("team_id").and_then(Value::as_str) {
        return Some(id.to_owned());
    }
    if let Some(event) = nested(payload, "event") {
        return team_id(event);
    }
    ["user", "view"].iter().find_map(|field| {
        nested(payload, field)
            .and_then(|o| o.get("team_id"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    })
}

pub fn user_id(payload: &Object) -> Option<String> {
    if let Some(id) = string_or_id(payload, "user") {
        return Some(id.to_owned());
    }
    if let Some(id) = payload.get("user_id").and_then(Value::as_str) {
        return Some(id.to_owned());
    }
    // message_changed and message_deleted nest the author one level down
    ["event", "message", "previous_message"]
        .iter()
        .find_map(|field| nested(payload, field))
        .and_then(user_id)
}

pub fn channel_id(payload: &Object) -> Option<String> {
    if let Some(id) = string_or_id(payload, "channel") {
        return Some(id.to_owned());
    }
    if let Some(id) = payload.get("channel_id").and_then(Value::as_str) {
        return Some(id.to_owned());
    }
    ["event", "item"]
        .iter()
        .find_map(|field| nested(payload, field))
        .and_then(channel_id)
}

pub fn response_url(payload: &Object) -> Option<String> {
    if let Some(url) = payload.get("response_url").and_then(Value::as_str) {
        return Some(url.to_owned());
    }
    payload
        .get("response_urls")
        .and_then(Value::as_array)
        .and_then(|urls| urls.first())
        .and_then(|u| u.get("response_url"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Object {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_event_callback_ids() {
        let body = obj(json!({
            "type": "event_callback",
            "team_id": "T1",
            "event": {"type": "app_mention", "user": "U1", "channel": "C1"}
        }));
        assert_eq!(team_id(&body).as_deref(), Some("T1"));
        assert_eq!(user_id(&body).as_deref(), Some("U1"));
        assert_eq!(channel_id(&body).as_deref(), Some("C1"));
        assert_eq!(enterprise_id(&body), None);
        assert!(!is_enterprise_install(&body));
    }

    #[test]
    fn test_interactive_payload_ids() {
        let body = obj(json!({
            "type": "block_actions",
            "team": {"id": "T2", "enterprise_id": "E2"},
            "user": {"id": "U2", "team_id": "T2"},
            "channel": {"id": "C2"},
            "response_url": "https://hooks.example/1"
        }));
        assert_eq!(team_id(&body).as_deref(), Some("T2"));
        assert_eq!(enterprise_id(&body).as_deref(), Some("E2"));
        assert_eq!(user_id(&body).as_deref(), Some("U2"));
        assert_eq!(channel_id(&body).as_deref(), Some("C2"));
        assert_eq!(response_url(&body).as_deref(), Some("https://hooks.example/1"));
    }

    #[test]
    fn test_authorizations_take_precedence() {
        let body = obj(json!({
            "team_id": "T_OUTER",
            "authorizations": [{"team_id": "T_AUTH", "enterprise_id": "E_AUTH", "is_enterprise_install": true}]
        }));
        assert_eq!(team_id(&body).as_deref(), Some("T_AUTH"));
        assert_eq!(enterprise_id(&body).as_deref(), Some("E_AUTH"));
        assert!(is_enterprise_install(&body));
    }

    #[test]
    fn test_missing_fields() {
        let body = Object::new();
        assert_eq!(team_id(&body), None);
        assert_eq!(user_id(&body), None);
        assert_eq!(channel_id(&body), None);
        assert_eq!(response_url(&body), None);
    }
}
