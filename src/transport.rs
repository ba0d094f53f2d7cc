//! Transport seam between the connection manager and the wire.
//!
//! [`Connector`] opens one [`Transport`] per connection attempt. The
//! production implementation speaks WebSocket text messages through
//! `tokio-tungstenite`; tests substitute an in-memory pair.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::ClientError;

/// One open, full-duplex text channel.
#[async_trait]
pub trait Transport: Send {
    /// Send one text message.
    async fn send(&mut self, text: String) -> Result<(), ClientError>;

    /// Next inbound text message, or `None` once the peer has closed.
    /// Messages that cannot be read as text are skipped, not returned as
    /// errors; an `Err` means the channel itself failed.
    ///
    /// Must be cancel-safe: the connection loop polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<String, ClientError>>;

    /// Close the channel from this side.
    async fn close(&mut self) -> Result<(), ClientError>;
}

/// Opens transports to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, ClientError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, ClientError> {
        let (stream, _) = connect_async(endpoint).await?;
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), ClientError> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ClientError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(e.into())),
            };
            match msg {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => tracing::warn!(error = %e, len = bytes.len(), "ws: dropping non-utf-8 binary frame"),
                },
                Message::Close(_) => return None,
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.stream.close(None).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "transport_mock_test.rs"]
pub(crate) mod mock;

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
