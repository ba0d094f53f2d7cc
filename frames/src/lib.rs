//! Shared frame model and JSON codec for the realtime WS transport.
//!
//! This crate owns the wire envelope `{type, topic, subtype, action, data,
//! timestamp}` exchanged with the realtime endpoint. Payloads stay flexible
//! (`serde_json::Value`); the envelope itself is strongly typed so the client
//! can route on `type` and `topic` without inspecting `data`.
//!
//! CORRELATION
//! ===========
//! Request frames carry a `requestId`. Servers echo it on the reply, either
//! at the top level or inside `data`; [`Frame::correlation_id`] checks both.
//! Legacy topics echo neither, and callers fall back to `(topic, action)`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Data key servers use when echoing a correlation id inside the payload.
pub const DATA_REQUEST_ID: &str = "requestId";

/// Data key for human-readable error text on ERROR frames.
pub const DATA_MESSAGE: &str = "message";

/// Alternate data key for error text used by older topics.
pub const DATA_ERROR: &str = "error";

/// Data key holding the credential on AUTH frames.
pub const DATA_TOKEN: &str = "token";

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text is not valid JSON or does not match the frame envelope.
    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),
    /// A frame type that is meaningless without a topic arrived without one.
    #[error("{0} frame is missing its topic")]
    MissingTopic(FrameType),
}

/// Kind of a frame on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrameType {
    /// Topic payload pushed by the server.
    Data,
    /// Server-side failure, optionally tied to a request.
    Error,
    /// Credential exchange and its acknowledgment.
    Auth,
    /// Client request, or its reply on legacy topics.
    Request,
    /// Topic interest registration.
    Subscribe,
    /// Topic interest removal.
    Unsubscribe,
    /// Liveness ping and its acknowledgment.
    Heartbeat,
}

impl FrameType {
    /// Wire name of the type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Error => "ERROR",
            Self::Auth => "AUTH",
            Self::Request => "REQUEST",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Heartbeat => "HEARTBEAT",
        }
    }

    /// Control frames are consumed by the connection itself and never
    /// reach topic listeners.
    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Auth | Self::Subscribe | Self::Unsubscribe | Self::Heartbeat)
    }

    fn requires_topic(self) -> bool {
        matches!(self, Self::Request | Self::Subscribe | Self::Unsubscribe)
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message on the realtime wire protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame kind, serialized as `type`.
    #[serde(rename = "type")]
    pub kind: FrameType,
    /// Logical channel, e.g. `market-data` or `contest-chat:42`.
    #[serde(default)]
    pub topic: String,
    /// Category within the topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Verb used for request/response correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Correlation id of the request this frame belongs to.
    #[serde(default, rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Arbitrary JSON payload.
    #[serde(default = "empty_object")]
    pub data: Value,
    /// ISO-8601 emission time.
    #[serde(default)]
    pub timestamp: String,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Frame {
    /// Create a frame of `kind` on `topic`, stamped with the current time.
    pub fn new(kind: FrameType, topic: impl Into<String>) -> Self {
        Self {
            kind,
            topic: topic.into(),
            subtype: None,
            action: None,
            request_id: None,
            data: empty_object(),
            timestamp: now_timestamp(),
        }
    }

    /// Topic subscribe control frame.
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self::new(FrameType::Subscribe, topic)
    }

    /// Topic unsubscribe control frame.
    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self::new(FrameType::Unsubscribe, topic)
    }

    /// Liveness ping.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(FrameType::Heartbeat, "")
    }

    /// Credential frame sent while authenticating.
    #[must_use]
    pub fn auth(token: &str) -> Self {
        Self::new(FrameType::Auth, "").with_data(serde_json::json!({ DATA_TOKEN: token }))
    }

    /// Request frame carrying its correlation id.
    pub fn request(
        topic: impl Into<String>,
        action: impl Into<String>,
        request_id: impl Into<String>,
        data: Value,
    ) -> Self {
        Self::new(FrameType::Request, topic)
            .with_action(action)
            .with_request_id(request_id)
            .with_data(data)
    }

    #[must_use]
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Correlation id echoed by the server: top-level `requestId` first,
    /// then `data.requestId`.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.request_id
            .as_deref()
            .or_else(|| self.data.get(DATA_REQUEST_ID).and_then(Value::as_str))
    }

    /// Human-readable error text carried by an ERROR (or rejected AUTH) frame.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.data
            .get(DATA_MESSAGE)
            .and_then(Value::as_str)
            .or_else(|| self.data.get(DATA_ERROR).and_then(Value::as_str))
    }

    /// Parsed emission time, if the timestamp is valid RFC 3339.
    #[must_use]
    pub fn emitted_at(&self) -> Option<OffsetDateTime> {
        match OffsetDateTime::parse(&self.timestamp, &Rfc3339) {
            Ok(at) => Some(at),
            Err(_) => None,
        }
    }
}

/// Current UTC time as an RFC 3339 string.
#[must_use]
pub fn now_timestamp() -> String {
    // Rfc3339 formatting only fails for years outside 0..=9999.
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Encode a frame as a JSON text message.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    // Serializing string-keyed JSON values cannot fail.
    serde_json::to_string(frame).unwrap_or_default()
}

/// Decode a JSON text message into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed JSON or unknown frame types
/// and [`CodecError::MissingTopic`] for REQUEST/SUBSCRIBE/UNSUBSCRIBE frames
/// without a topic.
pub fn decode_frame(text: &str) -> Result<Frame, CodecError> {
    let frame: Frame = serde_json::from_str(text)?;
    if frame.kind.requires_topic() && frame.topic.is_empty() {
        return Err(CodecError::MissingTopic(frame.kind));
    }
    Ok(frame)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
