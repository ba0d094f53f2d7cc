//! Request/response correlation over the shared connection.
//!
//! DESIGN
//! ======
//! Each request gets a fresh UUID v4 `requestId` and a pending entry holding a
//! `oneshot` sender. Inbound DATA/ERROR/REQUEST frames are offered to
//! [`Correlator::settle`]:
//! - A frame carrying a correlation id (top level or `data.requestId`) only
//!   settles the entry with that id.
//! - A frame carrying no id falls back to the oldest pending entry with the
//!   same `(topic, action)`. This fallback is best-effort: two identical
//!   requests in flight may receive each other's replies.
//!
//! Every pending entry is removed exactly once, by whichever comes first: its
//! reply, its deadline, a disconnect, or the caller dropping the future.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use frames::{Frame, FrameType};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::auth::AuthInjector;
use crate::error::ClientError;
use crate::outbox::Outbox;

/// Per-call overrides for [`Correlator::request`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestOptions {
    /// Deadline for the reply; `None` uses the client default.
    pub timeout: Option<Duration>,
    /// Fail fast with [`ClientError::Authentication`] unless authenticated.
    pub require_auth: bool,
}

impl RequestOptions {
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn authenticated(mut self) -> Self {
        self.require_auth = true;
        self
    }
}

type Reply = Result<Frame, ClientError>;

struct PendingRequest {
    topic: String,
    action: String,
    seq: u64,
    require_auth: bool,
    reply: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<String, PendingRequest>,
    next_seq: u64,
}

/// Table of in-flight requests awaiting a reply.
pub struct Correlator {
    pending: Mutex<PendingTable>,
    outbox: Arc<Outbox>,
    auth: Arc<AuthInjector>,
    default_timeout: Duration,
}

impl Correlator {
    pub(crate) fn new(outbox: Arc<Outbox>, auth: Arc<AuthInjector>, default_timeout: Duration) -> Self {
        Self { pending: Mutex::new(PendingTable::default()), outbox, auth, default_timeout }
    }

    /// Send a REQUEST frame and wait for its reply.
    ///
    /// Replies are matched by `requestId`. Legacy topics that do not echo the
    /// id are matched on `(topic, action)` against the oldest pending request,
    /// which is only reliable while one such request is in flight.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Authentication`] when `require_auth` is set and the
    ///   session is not authenticated, or auth is lost while waiting.
    /// - [`ClientError::NotConnected`] when no session is ready.
    /// - [`ClientError::RequestTimeout`] when the deadline elapses.
    /// - [`ClientError::Application`] when the server replies with ERROR.
    /// - [`ClientError::ConnectionLost`] when the connection drops first.
    pub async fn request(
        &self,
        topic: &str,
        action: &str,
        payload: Value,
        options: RequestOptions,
    ) -> Result<Frame, ClientError> {
        if options.require_auth && !self.auth.is_authenticated() {
            return Err(ClientError::Authentication(format!(
                "{topic}/{action} requires an authenticated session"
            )));
        }
        if !self.outbox.is_open() {
            return Err(ClientError::NotConnected);
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut table = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let seq = table.next_seq;
            table.next_seq += 1;
            table.entries.insert(
                request_id.clone(),
                PendingRequest {
                    topic: topic.to_owned(),
                    action: action.to_owned(),
                    seq,
                    require_auth: options.require_auth,
                    reply: reply_tx,
                },
            );
        }
        let _guard = PendingGuard { correlator: self, request_id: &request_id };

        let frame = Frame::request(topic, action, request_id.as_str(), payload);
        if !self.outbox.send(frame) {
            return Err(ClientError::NotConnected);
        }
        tracing::debug!(%request_id, topic, action, "request: sent");

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                tracing::warn!(%request_id, topic, action, ?timeout, "request: timed out");
                Err(ClientError::timeout(topic, action, timeout))
            }
        }
    }

    /// Offer an inbound frame to the pending table. Returns `true` if it
    /// settled a request.
    pub fn settle(&self, frame: &Frame) -> bool {
        if !matches!(frame.kind, FrameType::Data | FrameType::Error | FrameType::Request) {
            return false;
        }

        let entry = {
            let mut table = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let key = match frame.correlation_id() {
                Some(id) => table.entries.contains_key(id).then(|| id.to_owned()),
                None => oldest_for(&table, frame),
            };
            key.and_then(|k| table.entries.remove(&k).map(|entry| (k, entry)))
        };
        let Some((request_id, entry)) = entry else {
            return false;
        };

        let outcome = if frame.kind == FrameType::Error {
            let message = frame.error_message().unwrap_or("request failed").to_owned();
            tracing::debug!(%request_id, topic = %entry.topic, %message, "request: server error");
            Err(ClientError::Application { topic: entry.topic, action: entry.action, message })
        } else {
            tracing::debug!(%request_id, topic = %entry.topic, "request: settled");
            Ok(frame.clone())
        };
        // The caller may already have given up.
        if entry.reply.send(outcome).is_err() {
            tracing::trace!(%request_id, "request: reply dropped by caller");
        }
        true
    }

    /// Fail every pending request with `err`. Returns how many were failed.
    pub fn reject_all(&self, err: &ClientError) -> usize {
        self.reject_where(err, |_| true)
    }

    /// Fail pending requests that were issued with `require_auth`.
    pub fn reject_auth_required(&self, err: &ClientError) -> usize {
        self.reject_where(err, |entry| entry.require_auth)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    fn reject_where(&self, err: &ClientError, pred: impl Fn(&PendingRequest) -> bool) -> usize {
        let rejected = {
            let mut table = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let ids = table
                .entries
                .iter()
                .filter(|(_, entry)| pred(entry))
                .map(|(id, _)| id.clone())
                .collect::<Vec<_>>();
            ids.into_iter()
                .filter_map(|id| table.entries.remove(&id))
                .collect::<Vec<_>>()
        };

        let count = rejected.len();
        for entry in rejected {
            if entry.reply.send(Err(err.clone())).is_err() {
                tracing::trace!(topic = %entry.topic, "request: reply dropped by caller");
            }
        }
        if count > 0 {
            tracing::info!(count, error = %err, "request: rejected pending");
        }
        count
    }

    fn remove(&self, request_id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .remove(request_id);
    }
}

fn oldest_for(table: &PendingTable, frame: &Frame) -> Option<String> {
    let action = frame.action.as_deref()?;
    table
        .entries
        .iter()
        .filter(|(_, entry)| entry.topic == frame.topic && entry.action == action)
        .min_by_key(|(_, entry)| entry.seq)
        .map(|(id, _)| id.clone())
}

/// Removes the pending entry when the request future finishes or is dropped.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.remove(self.request_id);
    }
}

#[cfg(test)]
#[path = "correlator_test.rs"]
mod tests;
