//! Auth injector: credential holder and authenticated-state signal.
//!
//! ARCHITECTURE
//! ============
//! The application's session store pushes tokens in with [`AuthInjector::set_token`].
//! The connection task reads the token when a session enters `AUTHENTICATING`
//! and watches for later changes: a new token is re-sent on the live
//! connection, a cleared token drops the session to unauthenticated.
//!
//! `is_authenticated` is only `true` after the server acknowledged a token.
//! A session without a token still reaches `AUTHENTICATED` (public topics
//! keep working) with `is_authenticated == false`.

use frames::{Frame, FrameType};
use serde_json::Value;
use tokio::sync::watch;

use crate::error::ClientError;

/// Holds the current credential and the server's verdict on it.
pub struct AuthInjector {
    token: watch::Sender<Option<String>>,
    authenticated: watch::Sender<bool>,
}

impl AuthInjector {
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        let (token, _) = watch::channel(token.filter(|t| !t.is_empty()));
        let (authenticated, _) = watch::channel(false);
        Self { token, authenticated }
    }

    /// Replace the credential. `None` (or an empty string) clears it.
    ///
    /// On a live connection a new token is re-sent immediately; clearing it
    /// drops the session to unauthenticated.
    pub fn set_token(&self, token: Option<String>) {
        let token = token.filter(|t| !t.is_empty());
        let present = token.is_some();
        let changed = self.token.send_if_modified(|current| {
            if *current == token {
                false
            } else {
                *current = token;
                true
            }
        });
        if changed {
            tracing::info!(present, "auth: token updated");
        }
    }

    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        *self.authenticated.borrow()
    }

    /// Receiver that yields every flip of the authenticated flag.
    #[must_use]
    pub fn watch_authenticated(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }

    pub(crate) fn watch_token(&self) -> watch::Receiver<Option<String>> {
        self.token.subscribe()
    }

    /// AUTH frame for the current token, or `None` to proceed unauthenticated.
    pub(crate) fn auth_frame(&self) -> Option<Frame> {
        self.token.borrow().as_deref().map(Frame::auth)
    }

    pub(crate) fn set_authenticated(&self, value: bool) {
        let changed = self.authenticated.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        if changed {
            tracing::info!(authenticated = value, "auth: state changed");
        }
    }

    /// Interpret an inbound AUTH frame as acceptance or rejection.
    ///
    /// A reply is a rejection when `data.error` is present or
    /// `data.status == "error"`.
    pub(crate) fn evaluate_ack(frame: &Frame) -> Result<(), ClientError> {
        debug_assert_eq!(frame.kind, FrameType::Auth);

        let status_error = frame
            .data
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("error"));
        let error_text = frame.data.get(frames::DATA_ERROR).and_then(Value::as_str);

        if status_error || error_text.is_some() {
            let message = frame.error_message().unwrap_or("token rejected").to_owned();
            return Err(ClientError::Authentication(message));
        }
        Ok(())
    }
}

impl Default for AuthInjector {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
