//! Unified real-time messaging client.
//!
//! Many independently mounted consumers share one persistent WebSocket
//! connection. The client multiplexes topic subscriptions over it, routes
//! inbound frames to listeners, correlates request/response pairs, and
//! recovers from abnormal disconnects without reconnect storms.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`client`] | [`RealtimeClient`] context and the per-feature [`Consumer`] facade |
//! | [`connection`] | Connection state machine, heartbeat, backoff and circuit breaker |
//! | [`auth`] | Credential holder and authenticated-state signal |
//! | [`registry`] | Refcounted topic subscriptions |
//! | [`router`] | Typed, topic-filtered fan-out to listeners |
//! | [`correlator`] | Request/response matching with deadlines |
//! | [`transport`] | Transport seam and the `tokio-tungstenite` implementation |
//! | [`config`] | [`ClientConfig`] and environment loading |
//! | [`error`] | [`ClientError`] taxonomy |
//!
//! The wire envelope and JSON codec live in the `frames` crate and are
//! re-exported here.
//!
//! ## Example
//!
//! ```no_run
//! use livefeed::{ClientConfig, FrameType, RealtimeClient};
//!
//! # async fn run() -> Result<(), livefeed::ClientError> {
//! let client = RealtimeClient::new(ClientConfig::new("wss://example.com/ws")?);
//! client.auth().set_token(Some("session-token".into()));
//!
//! let ticker = client.consumer(
//!     "price-ticker",
//!     [FrameType::Data],
//!     |frame| println!("{}: {}", frame.topic, frame.data),
//!     &["market-data"],
//! )?;
//!
//! let balance = ticker.request("wallet", "getBalance", serde_json::json!({})).await?;
//! println!("{}", balance.data);
//!
//! ticker.dispose();
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
mod outbox;
pub mod registry;
pub mod router;
pub mod transport;

pub use auth::AuthInjector;
pub use client::{Consumer, ListenerHandle, RealtimeClient};
pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use correlator::{Correlator, RequestOptions};
pub use error::ClientError;
pub use frames::{Frame, FrameType};
pub use registry::TopicRegistry;
pub use router::{Listener, ListenerCallback, MessageRouter, TopicFilter};
pub use transport::{Connector, Transport, WsConnector};
