//! Client error taxonomy.
//!
//! Connection-level failures (`Connection`, `AbnormalClosure`) are absorbed by
//! the connection manager's retry policy and only surface through connection
//! state. Request-level failures always reach the caller that issued the
//! request.

use std::time::Duration;

/// Errors surfaced by the realtime client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The transport failed to open.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The connection closed without the application asking it to.
    #[error("connection closed abnormally: {0}")]
    AbnormalClosure(String),
    /// The credential was rejected, expired, or is required but absent.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// No reply arrived before the request deadline.
    #[error("request {topic}/{action} timed out after {timeout_ms}ms")]
    RequestTimeout {
        topic: String,
        action: String,
        timeout_ms: u64,
    },
    /// The server answered a request with an ERROR frame.
    #[error("server error for {topic}/{action}: {message}")]
    Application {
        topic: String,
        action: String,
        message: String,
    },
    /// The connection dropped while the request was pending.
    #[error("connection lost before a reply arrived")]
    ConnectionLost,
    /// The request was issued while the connection was not ready.
    #[error("not connected")]
    NotConnected,
    /// A listener with this id is already registered.
    #[error("listener `{0}` is already registered")]
    DuplicateListener(String),
    /// Unsubscribing would drive these topics' refcounts below zero.
    #[error("unsubscribe without matching subscribe: {0:?}")]
    UnsubscribeUnderflow(Vec<String>),
    /// The endpoint URL has an unsupported scheme.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// Required configuration is missing.
    #[error("configuration error: {0}")]
    Config(String),
    /// A frame could not be decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl ClientError {
    /// Build a timeout error for a request.
    #[must_use]
    pub fn timeout(topic: &str, action: &str, timeout: Duration) -> Self {
        Self::RequestTimeout {
            topic: topic.to_owned(),
            action: action.to_owned(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Whether re-issuing the same call after reconnection may succeed.
    ///
    /// Requests are never retried automatically; this only informs callers.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::AbnormalClosure(_)
                | Self::RequestTimeout { .. }
                | Self::ConnectionLost
                | Self::NotConnected
        )
    }
}

impl From<frames::CodecError> for ClientError {
    fn from(err: frames::CodecError) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
