//! Message router: typed fan-out of inbound frames to listeners.
//!
//! DESIGN
//! ======
//! An ordered list of `{id, type filter, topic filter, callback}` records.
//! Dispatch snapshots the matching callbacks under the lock, releases it, and
//! then invokes them in registration order. Callbacks may therefore register,
//! deregister, subscribe or issue requests without deadlocking the router.
//!
//! A panicking callback is caught and logged; delivery continues with the
//! next listener.

use std::collections::{BTreeSet, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use frames::{Frame, FrameType};

use crate::error::ClientError;

/// Callback invoked for every matching frame.
pub type ListenerCallback = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Which topics a listener wants to hear.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopicFilter {
    /// Every topic.
    Any,
    /// Only these topics.
    Topics(BTreeSet<String>),
}

impl TopicFilter {
    pub fn topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Topics(topics.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Topics(set) => set.contains(topic),
        }
    }
}

/// A listener registration.
#[derive(Clone)]
pub struct Listener {
    pub id: String,
    pub types: HashSet<FrameType>,
    pub topics: TopicFilter,
    pub callback: ListenerCallback,
}

impl Listener {
    /// Listener for `types` on any topic.
    pub fn new<I, F>(id: impl Into<String>, types: I, callback: F) -> Self
    where
        I: IntoIterator<Item = FrameType>,
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            types: types.into_iter().collect(),
            topics: TopicFilter::Any,
            callback: Arc::new(callback),
        }
    }

    #[must_use]
    pub fn with_topics(mut self, topics: TopicFilter) -> Self {
        self.topics = topics;
        self
    }

    #[must_use]
    pub fn matches(&self, frame: &Frame) -> bool {
        self.types.contains(&frame.kind) && self.topics.matches(&frame.topic)
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("types", &self.types)
            .field("topics", &self.topics)
            .finish_non_exhaustive()
    }
}

/// Ordered listener table shared by all consumers.
#[derive(Default)]
pub struct MessageRouter {
    listeners: Mutex<Vec<Listener>>,
}

impl MessageRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DuplicateListener`] if the id is already live.
    pub fn register(&self, listener: Listener) -> Result<(), ClientError> {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if listeners.iter().any(|l| l.id == listener.id) {
            return Err(ClientError::DuplicateListener(listener.id));
        }
        tracing::debug!(listener = %listener.id, "router: registered");
        listeners.push(listener);
        Ok(())
    }

    /// Remove a listener. Returns `false` if the id was not registered.
    pub fn deregister(&self, id: &str) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        let removed = listeners.len() != before;
        if removed {
            tracing::debug!(listener = %id, "router: deregistered");
        }
        removed
    }

    /// Replace a listener's topic filter. Returns `false` if the id is unknown.
    pub fn set_topic_filter(&self, id: &str, topics: TopicFilter) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        match listeners.iter_mut().find(|l| l.id == id) {
            Some(listener) => {
                listener.topics = topics;
                true
            }
            None => false,
        }
    }

    /// Whether a listener with this id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|l| l.id == id)
    }

    /// Deliver `frame` to every matching listener in registration order.
    /// Returns how many callbacks completed without panicking.
    pub fn dispatch(&self, frame: &Frame) -> usize {
        let targets = {
            let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners
                .iter()
                .filter(|l| l.matches(frame))
                .map(|l| (l.id.clone(), Arc::clone(&l.callback)))
                .collect::<Vec<_>>()
        };

        let mut delivered = 0;
        for (id, callback) in targets {
            match catch_unwind(AssertUnwindSafe(|| callback(frame))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    tracing::error!(
                        listener = %id,
                        topic = %frame.topic,
                        kind = %frame.kind,
                        reason = panic_reason(payload.as_ref()),
                        "router: listener panicked"
                    );
                }
            }
        }
        delivered
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;
