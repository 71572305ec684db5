//! Acknowledgment handle.
//!
//! Every matched request gets one [`Ack`]. The first call that produces a
//! response wins; later calls are ignored. The dispatcher reads the stored
//! response once the handler settles.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use conduit_core::{AckBuildError, Response};

#[derive(Debug, Default)]
struct AckState {
    response: Option<Response>,
    build_error: Option<String>,
}

/// Cheaply cloneable acknowledgment handle shared with the handler.
#[derive(Debug, Clone, Default)]
pub struct Ack {
    state: Arc<Mutex<AckState>>,
}

impl Ack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledges with `200` and an empty body.
    ///
    /// Returns `true` if this call produced the acknowledgment.
    pub fn ack(&self) -> bool {
        self.ack_response(Response::ok())
    }

    /// Acknowledges with `200` and a plain-text body.
    pub fn ack_text(&self, text: impl Into<String>) -> bool {
        self.ack_response(Response::text(200, text))
    }

    /// Acknowledges with `200` and `value` serialized as JSON.
    ///
    /// A serialization failure is an [`AckBuildError`]; it is recorded on the
    /// handle so the dispatcher treats the request as fatally failed even if
    /// the handler swallows the error.
    pub fn ack_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<bool, AckBuildError> {
        match Response::json(200, value) {
            Ok(resp) => Ok(self.ack_response(resp)),
            Err(e) => {
                self.state.lock().build_error = Some(e.to_string());
                Err(AckBuildError::Serialize(e))
            }
        }
    }

    /// Acknowledges with a fully built response.
    pub fn ack_response(&self, response: Response) -> bool {
        let mut state = self.state.lock();
        if state.response.is_some() {
            debug!(status = response.status, "Already acknowledged, ignoring");
            return false;
        }
        state.response = Some(response);
        true
    }

    pub fn is_acknowledged(&self) -> bool {
        self.state.lock().response.is_some()
    }

    /// The stored acknowledgment, if any.
    pub fn response(&self) -> Option<Response> {
        self.state.lock().response.clone()
    }

    /// Takes a recorded build failure, if one happened.
    pub(crate) fn take_build_error(&self) -> Option<AckBuildError> {
        self.state
            .lock()
            .build_error
            .take()
            .map(AckBuildError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use tokio_test::{assert_err, assert_ok};

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("cannot serialize"))
        }
    }

    #[test]
    fn test_first_ack_wins() {
        let ack = Ack::new();
        assert!(!ack.is_acknowledged());
        assert!(ack.ack_text("first"));
        assert!(!ack.ack());
        let resp = ack.response().unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "first");
    }

    #[test]
    fn test_clones_share_state() {
        let ack = Ack::new();
        let clone = ack.clone();
        assert!(assert_ok!(clone.ack_json(&serde_json::json!({"text": "hi"}))));
        assert_eq!(ack.response().unwrap().body, r#"{"text":"hi"}"#);
    }

    #[test]
    fn test_json_failure_is_recorded() {
        let ack = Ack::new();
        assert_err!(ack.ack_json(&Unserializable));
        assert!(!ack.is_acknowledged());
        assert!(ack.take_build_error().is_some());
        assert!(ack.take_build_error().is_none());
    }
}
