//! Handler registry.
//!
//! Handlers are stored per event name, then per integer priority, then in
//! registration order. Resolution walks priorities from highest to lowest and
//! keeps registration order inside each bucket.

use std::collections::{BTreeMap, HashMap};
use tidings_core::{Handler, Predicate};

/// A handler together with its optional guard.
#[derive(Clone, Debug)]
pub struct HandlerRegistration {
    /// The handler function.
    pub handler: Handler,
    /// Evaluated before each call; `None` means "always".
    pub predicate: Option<Predicate>,
}

/// A handler resolved for one dispatch.
#[derive(Clone, Debug)]
pub struct ResolvedHandler {
    /// Priority bucket it came from.
    pub priority: i32,
    /// The handler function.
    pub handler: Handler,
    /// Its guard, if any.
    pub predicate: Option<Predicate>,
}

impl ResolvedHandler {
    /// Returns true for async handlers.
    pub fn is_async(&self) -> bool {
        self.handler.is_async()
    }
}

/// Outcome of [`HandlerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    /// A new entry was appended to the bucket.
    Added,
    /// The handler was already in the bucket; only its predicate changed.
    PredicateUpdated,
}

/// Handlers keyed by event name, then priority.
#[derive(Default, Debug)]
pub struct HandlerRegistry {
    events: HashMap<String, BTreeMap<i32, Vec<HandlerRegistration>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event` at `priority`.
    ///
    /// The same handler registered again at the same priority keeps its slot
    /// and only takes the new predicate. A different priority is a separate,
    /// independent registration.
    pub fn register(
        &mut self,
        event: &str,
        priority: i32,
        handler: Handler,
        predicate: Option<Predicate>,
    ) -> Registered {
        let bucket = self
            .events
            .entry(event.to_string())
            .or_default()
            .entry(priority)
            .or_default();

        let id = handler.id();
        if let Some(existing) = bucket.iter_mut().find(|r| r.handler.id() == id) {
            existing.predicate = predicate;
            return Registered::PredicateUpdated;
        }

        bucket.push(HandlerRegistration { handler, predicate });
        Registered::Added
    }

    /// Handlers for `event`, highest priority first, registration order within
    /// a priority.
    pub fn sorted(&self, event: &str) -> Vec<ResolvedHandler> {
        let Some(buckets) = self.events.get(event) else {
            return Vec::new();
        };

        buckets
            .iter()
            .rev()
            .flat_map(|(priority, bucket)| {
                bucket.iter().map(move |r| ResolvedHandler {
                    priority: *priority,
                    handler: r.handler.clone(),
                    predicate: r.predicate.clone(),
                })
            })
            .collect()
    }

    /// Number of registrations for `event`, across all priorities.
    pub fn handler_count(&self, event: &str) -> usize {
        self.events
            .get(event)
            .map(|buckets| buckets.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Event names that have at least one registration.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(String::as_str)
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
