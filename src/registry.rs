//! Topic subscription registry.
//!
//! DESIGN
//! ======
//! A refcount table keyed by topic. Every consumer mount/unmount funnels
//! through [`TopicRegistry::subscribe`] and [`TopicRegistry::unsubscribe`]:
//! - SUBSCRIBE is emitted only on a 0→1 transition, UNSUBSCRIBE only on 1→0.
//! - Entries are removed as soon as their count returns to zero, so every
//!   entry in the table has a count of at least one.
//! - Control frames are queued on the outbox while the table lock is held.
//!   A concurrent mount and unmount of the same topic therefore cannot
//!   reorder their SUBSCRIBE/UNSUBSCRIBE frames.
//!
//! While no session is authenticated the table still counts, but nothing is
//! sent; [`TopicRegistry::resume`] replays one SUBSCRIBE per live topic when
//! the next session becomes ready.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use frames::Frame;
use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::outbox::Outbox;

/// Process-wide refcount table for topic interest.
pub struct TopicRegistry {
    refcounts: Mutex<HashMap<String, NonZeroUsize>>,
    outbox: Arc<Outbox>,
}

impl TopicRegistry {
    pub(crate) fn new(outbox: Arc<Outbox>) -> Self {
        Self { refcounts: Mutex::new(HashMap::new()), outbox }
    }

    /// Add one reference to each topic. Topics going 0→1 get a SUBSCRIBE
    /// frame now if the session is ready, otherwise on the next
    /// authenticated transition.
    ///
    /// Returns `true` when the subscription is live immediately.
    pub fn subscribe<S: AsRef<str>>(&self, topics: &[S]) -> bool {
        let mut table = self.refcounts.lock().unwrap_or_else(PoisonError::into_inner);
        let live = self.outbox.is_open();

        for topic in topics {
            let topic = topic.as_ref();
            if let Some(count) = table.get_mut(topic) {
                *count = count.saturating_add(1);
                tracing::trace!(topic, refcount = count.get(), "registry: reference added");
                continue;
            }

            table.insert(topic.to_owned(), NonZeroUsize::MIN);
            if live && self.outbox.send(Frame::subscribe(topic)) {
                tracing::debug!(topic, "registry: subscribed");
            } else {
                tracing::debug!(topic, "registry: subscribe deferred until authenticated");
            }
        }

        live
    }

    /// Drop one reference from each topic. Topics going 1→0 are removed and
    /// get an UNSUBSCRIBE frame if the session is ready.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnsubscribeUnderflow`] when any topic would drop
    /// below zero. The call is then rejected as a whole and no refcount changes.
    pub fn unsubscribe<S: AsRef<str>>(&self, topics: &[S]) -> Result<(), ClientError> {
        let mut table = self.refcounts.lock().unwrap_or_else(PoisonError::into_inner);

        let mut wanted: BTreeMap<&str, usize> = BTreeMap::new();
        for topic in topics {
            *wanted.entry(topic.as_ref()).or_default() += 1;
        }
        let underflow = wanted
            .iter()
            .filter(|(topic, n)| table.get(**topic).map_or(0, |c| c.get()) < **n)
            .map(|(topic, _)| (*topic).to_owned())
            .collect::<Vec<_>>();
        if !underflow.is_empty() {
            tracing::warn!(topics = ?underflow, "registry: unsubscribe without matching subscribe");
            return Err(ClientError::UnsubscribeUnderflow(underflow));
        }

        let live = self.outbox.is_open();
        for topic in topics {
            let topic = topic.as_ref();
            let Some(count) = table.get_mut(topic) else {
                continue;
            };
            if let Some(remaining) = NonZeroUsize::new(count.get() - 1) {
                *count = remaining;
                tracing::trace!(topic, refcount = remaining.get(), "registry: reference dropped");
                continue;
            }

            table.remove(topic);
            if live && self.outbox.send(Frame::unsubscribe(topic)) {
                tracing::debug!(topic, "registry: unsubscribed");
            } else {
                tracing::debug!(topic, "registry: released while offline");
            }
        }

        Ok(())
    }

    /// Current refcount of `topic` (0 when absent).
    #[must_use]
    pub fn refcount(&self, topic: &str) -> usize {
        self.refcounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, |c| c.get())
    }

    /// Topics with a nonzero refcount, sorted.
    #[must_use]
    pub fn active_topics(&self) -> Vec<String> {
        let table = self.refcounts.lock().unwrap_or_else(PoisonError::into_inner);
        let mut topics = table.keys().cloned().collect::<Vec<_>>();
        topics.sort();
        topics
    }

    /// Open the outbox for a ready session and re-emit SUBSCRIBE for every
    /// live topic. Returns how many topics were resubscribed.
    pub(crate) fn resume(&self, tx: mpsc::UnboundedSender<Frame>) -> usize {
        let table = self.refcounts.lock().unwrap_or_else(PoisonError::into_inner);
        self.outbox.install(tx);

        let mut topics = table.keys().collect::<Vec<_>>();
        topics.sort();
        let mut sent = 0;
        for topic in topics {
            if self.outbox.send(Frame::subscribe(topic.as_str())) {
                sent += 1;
            }
        }
        sent
    }

    /// Close the outbox when the session ends. Refcounts are kept.
    pub(crate) fn suspend(&self) {
        let _table = self.refcounts.lock().unwrap_or_else(PoisonError::into_inner);
        self.outbox.clear();
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
