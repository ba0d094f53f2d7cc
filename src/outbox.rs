//! Outbound frame queue for the live session.
//!
//! The connection task installs a fresh sender each time a session reaches
//! `AUTHENTICATED` and clears it when the session ends. Everything that emits
//! frames on behalf of consumers (subscribe/unsubscribe, requests) goes through
//! here, so "is the link ready" and "send" are answered by the same lock.

use std::sync::{Mutex, PoisonError};

use frames::Frame;
use tokio::sync::mpsc;

#[derive(Default)]
pub(crate) struct Outbox {
    tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

impl Outbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn install(&self, tx: mpsc::UnboundedSender<Frame>) {
        *self.tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }

    pub(crate) fn clear(&self) {
        *self.tx.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn is_open(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Queue a frame for the live session. Returns `false` when no session
    /// is ready to carry it.
    pub(crate) fn send(&self, frame: Frame) -> bool {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }
}
