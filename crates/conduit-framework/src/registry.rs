//! The listener registry.
//!
//! Listeners are kept in registration order and scanned linearly; the first
//! whose matchers accept a request owns it. The registry is built once and
//! then shared read-only between concurrent dispatches.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use conduit_core::{Request, Response};

use crate::handler::LazyFunction;
use crate::listener::Listener;
use crate::matcher::MatchOutcome;

/// Ordered, write-once collection of listeners.
///
/// Lazy functions are indexed by `(listener, function)`, so two listeners
/// may both declare a `notify` without shadowing each other.
#[derive(Default, Clone)]
pub struct ListenerRegistry {
    listeners: Vec<Listener>,
    lazy_index: HashMap<(String, String), Arc<LazyFunction>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener after every existing one.
    ///
    /// A listener reusing an earlier listener's name still matches, but its
    /// lazy functions are only reachable through that earlier registration.
    pub fn register(&mut self, listener: Listener) {
        for function in listener.lazy_functions() {
            let key = (listener.name().to_owned(), function.name().to_owned());
            if self.lazy_index.contains_key(&key) {
                warn!(
                    listener = listener.name(),
                    function = function.name(),
                    "Lazy function already registered for this listener name, keeping the first"
                );
                continue;
            }
            self.lazy_index.insert(key, Arc::clone(function));
        }
        debug!(listener = listener.name(), position = self.listeners.len(), "Registered listener");
        self.listeners.push(listener);
    }

    /// Registers a listener (builder pattern).
    pub fn with(mut self, listener: Listener) -> Self {
        self.register(listener);
        self
    }

    /// Finds the first listener that accepts the request.
    pub fn find(&self, req: &Request, resp: &Response) -> Option<(&Listener, MatchOutcome)> {
        self.listeners.iter().find_map(|listener| {
            let outcome = listener.evaluate(req, resp);
            outcome.is_match().then_some((listener, outcome))
        })
    }

    /// Looks up the lazy function `function` declared by `listener`.
    ///
    /// Without a listener the name must be unique across the registry;
    /// ambiguous names resolve to nothing.
    pub fn lazy_function(&self, listener: Option<&str>, function: &str) -> Option<&Arc<LazyFunction>> {
        match listener {
            Some(listener) => self
                .lazy_index
                .get(&(listener.to_owned(), function.to_owned())),
            None => {
                let mut found = self
                    .lazy_index
                    .iter()
                    .filter(|((_, name), _)| name == function)
                    .map(|(_, f)| f);
                match (found.next(), found.next()) {
                    (Some(only), None) => Some(only),
                    (Some(_), Some(_)) => {
                        warn!(function, "Lazy function name is declared by several listeners");
                        None
                    }
                    _ => None,
                }
            }
        }
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listener_count", &self.listeners.len())
            .field("lazy_functions", &self.lazy_index.keys().collect::<Vec<_>>())
            .finish()
    }
}
