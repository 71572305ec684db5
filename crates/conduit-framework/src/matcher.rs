//! Listener matchers.
//!
//! A [`Matcher`] is a pure predicate over the request and the in-progress
//! response. It never fails: a body that lacks the inspected field simply
//! does not match. The only artifact a matcher produces is the list of
//! captures in [`MatchOutcome::Matched`], which the dispatcher writes into
//! the request context under the reserved `matches` key.
//!
//! # Example
//!
//! ```rust,ignore
//! use conduit_framework::Matcher;
//!
//! let on_mention = Matcher::event_type("app_mention");
//! let on_deploy = Matcher::regex_text(r"deploy (\w+)")?;
//! let on_admins = Matcher::custom(|req, _resp| req.context().user_id() == Some("U_ADMIN"));
//! ```

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use conduit_core::{Body, Request, Response};

/// A custom matcher predicate.
pub type CheckFn = Arc<dyn Fn(&Request, &Response) -> bool + Send + Sync>;

/// Result of evaluating a matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The listener does not apply.
    NoMatch,
    /// The listener applies; `captures` are surfaced into the context.
    Matched { captures: Option<Vec<String>> },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }

    fn matched() -> Self {
        Self::Matched { captures: None }
    }
}

/// Predicate selecting the listener that owns a request.
#[derive(Clone)]
pub enum Matcher {
    /// `event.type` of an events API envelope equals the value.
    EventType(String),
    /// Top-level `type` of the body equals the value (e.g. `block_actions`).
    PayloadType(String),
    /// Slash command name equals the value (e.g. `/deploy`).
    Command(String),
    /// Regex over the message text; capture groups are surfaced.
    RegexText(Regex),
    /// Arbitrary predicate.
    Custom(CheckFn),
}

impl Matcher {
    pub fn event_type(event_type: impl Into<String>) -> Self {
        Self::EventType(event_type.into())
    }

    pub fn payload_type(payload_type: impl Into<String>) -> Self {
        Self::PayloadType(payload_type.into())
    }

    pub fn command(command: impl Into<String>) -> Self {
        Self::Command(command.into())
    }

    /// Compiles `pattern` into a text matcher.
    pub fn regex_text(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::RegexText)
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Request, &Response) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Evaluates the matcher without touching the request.
    pub fn evaluate(&self, req: &Request, resp: &Response) -> MatchOutcome {
        let body = req.body();
        let hit = match self {
            Self::EventType(expected) => event_field(body, "type") == Some(expected.as_str()),
            Self::PayloadType(expected) => {
                body.get("type").and_then(Value::as_str) == Some(expected.as_str())
            }
            Self::Command(expected) => {
                body.get("command").and_then(Value::as_str) == Some(expected.as_str())
            }
            Self::RegexText(re) => {
                return match message_text(body) {
                    Some(text) if re.is_match(text) => MatchOutcome::Matched {
                        captures: Some(captures(re, text)),
                    },
                    _ => MatchOutcome::NoMatch,
                };
            }
            Self::Custom(f) => f(req, resp),
        };
        if hit {
            MatchOutcome::matched()
        } else {
            MatchOutcome::NoMatch
        }
    }

    pub fn matches(&self, req: &Request, resp: &Response) -> bool {
        self.evaluate(req, resp).is_match()
    }

    /// Short description used in logs.
    pub fn describe(&self) -> String {
        match self {
            Self::EventType(t) => format!("event_type={t}"),
            Self::PayloadType(t) => format!("payload_type={t}"),
            Self::Command(c) => format!("command={c}"),
            Self::RegexText(re) => format!("regex={}", re.as_str()),
            Self::Custom(_) => "custom".to_owned(),
        }
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

fn event_field<'a>(body: &'a Body, field: &str) -> Option<&'a str> {
    body.get("event")
        .and_then(|e| e.get(field))
        .and_then(Value::as_str)
}

/// Text of a message event, falling back to a top-level `text` field.
fn message_text(body: &Body) -> Option<&str> {
    event_field(body, "text").or_else(|| body.get("text").and_then(Value::as_str))
}

/// With groups: the first match's groups. Without: every whole match.
fn captures(re: &Regex, text: &str) -> Vec<String> {
    if re.captures_len() > 1 {
        re.captures(text)
            .map(|caps| {
                caps.iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_owned()).unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default()
    } else {
        re.find_iter(text).map(|m| m.as_str().to_owned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(text: &str) -> Request {
        Request::from_json(json!({
            "type": "event_callback",
            "event": {"type": "message", "text": text, "user": "U1"}
        }))
    }

    #[test]
    fn test_event_type() {
        let req = event("hi");
        assert!(Matcher::event_type("message").matches(&req, &Response::pending()));
        assert!(!Matcher::event_type("app_mention").matches(&req, &Response::pending()));
    }

    #[test]
    fn test_regex_with_groups_surfaces_first_match_groups() {
        let m = Matcher::regex_text(r"deploy (\w+) to (\w+)").unwrap();
        let outcome = m.evaluate(&event("deploy api to prod, deploy web to dev"), &Response::pending());
        assert_eq!(
            outcome,
            MatchOutcome::Matched {
                captures: Some(vec!["api".into(), "prod".into()])
            }
        );
    }

    #[test]
    fn test_regex_without_groups_surfaces_all_matches() {
        let m = Matcher::regex_text(r"\d+").unwrap();
        let outcome = m.evaluate(&event("1 and 22 and 333"), &Response::pending());
        assert_eq!(
            outcome,
            MatchOutcome::Matched {
                captures: Some(vec!["1".into(), "22".into(), "333".into()])
            }
        );
    }

    #[test]
    fn test_missing_fields_never_match() {
        let empty = Request::new("");
        let resp = Response::pending();
        let matchers = [
            Matcher::event_type("message"),
            Matcher::payload_type("block_actions"),
            Matcher::command("/deploy"),
            Matcher::regex_text(".*").unwrap(),
        ];
        for m in &matchers {
            assert_eq!(m.evaluate(&empty, &resp), MatchOutcome::NoMatch, "{m:?}");
        }
    }

    #[test]
    fn test_command_and_custom() {
        let req = Request::new("command=%2Fdeploy&text=prod");
        let resp = Response::pending();
        assert!(Matcher::command("/deploy").matches(&req, &resp));
        assert!(Matcher::regex_text("^prod$").unwrap().matches(&req, &resp));
        assert!(Matcher::custom(|r, _| r.body().contains_key("text")).matches(&req, &resp));
    }
}
