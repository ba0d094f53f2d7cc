use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use super::*;

async fn local_server() -> (String, tokio::task::JoinHandle<WebSocketStream<TcpStream>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        accept_async(socket).await.unwrap()
    });
    (format!("ws://{addr}"), handle)
}

#[tokio::test]
async fn ws_transport_exchanges_text_messages() {
    let (url, server) = local_server().await;
    let mut transport = WsConnector.connect(&url).await.unwrap();
    let mut server = server.await.unwrap();

    transport.send(r#"{"type":"HEARTBEAT"}"#.to_owned()).await.unwrap();
    let got = server.next().await.unwrap().unwrap();
    assert_eq!(got.into_text().unwrap().as_str(), r#"{"type":"HEARTBEAT"}"#);

    server.send(Message::Text("hello".into())).await.unwrap();
    assert_eq!(transport.recv().await.unwrap().unwrap(), "hello");
}

#[tokio::test]
async fn ws_transport_accepts_utf8_binary_and_skips_pings() {
    let (url, server) = local_server().await;
    let mut transport = WsConnector.connect(&url).await.unwrap();
    let mut server = server.await.unwrap();

    server.send(Message::Ping(Vec::new().into())).await.unwrap();
    server.send(Message::Binary(b"payload".to_vec().into())).await.unwrap();

    assert_eq!(transport.recv().await.unwrap().unwrap(), "payload");
}

#[tokio::test]
async fn ws_transport_skips_non_utf8_binary_without_failing() {
    let (url, server) = local_server().await;
    let mut transport = WsConnector.connect(&url).await.unwrap();
    let mut server = server.await.unwrap();

    server.send(Message::Binary(vec![0xff, 0xfe, 0xfd].into())).await.unwrap();
    server.send(Message::Text("after".into())).await.unwrap();

    assert_eq!(transport.recv().await.unwrap().unwrap(), "after");
}

#[tokio::test]
async fn ws_session_survives_non_utf8_binary_frame() {
    use frames::{Frame, FrameType};

    use crate::client::RealtimeClient;
    use crate::config::ClientConfig;
    use crate::connection::ConnectionState;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accepts_tx, mut accepts_rx) = tokio::sync::mpsc::unbounded_channel();
    let server = tokio::spawn(async move {
        loop {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            accepts_tx.send(()).unwrap();
            ws.send(Message::Binary(vec![0xff, 0xfe, 0xfd].into())).await.unwrap();
            ws.send(Message::Text(frames::encode_frame(&Frame::new(FrameType::Data, "t")).into()))
                .await
                .unwrap();
            // Hold the socket open until the client goes away.
            while let Some(Ok(_)) = ws.next().await {}
        }
    });

    let mut config = ClientConfig::new(&format!("ws://{addr}")).unwrap();
    config.backoff_jitter = 0.0;
    let client = RealtimeClient::new(config);
    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    let _consumer = client
        .consumer(
            "c",
            [FrameType::Data],
            move |f: &Frame| {
                seen_tx.send(f.topic.clone()).unwrap();
            },
            &[] as &[&str],
        )
        .unwrap();

    assert_eq!(seen_rx.recv().await.unwrap(), "t");
    accepts_rx.recv().await.unwrap();
    assert!(accepts_rx.try_recv().is_err(), "no reconnect");
    assert_eq!(client.connection().state(), ConnectionState::Authenticated);

    client.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn ws_transport_reports_peer_close_as_end_of_stream() {
    let (url, server) = local_server().await;
    let mut transport = WsConnector.connect(&url).await.unwrap();
    let mut server = server.await.unwrap();

    server.close(None).await.unwrap();
    assert!(transport.recv().await.is_none());
}

#[tokio::test]
async fn refused_connection_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = WsConnector.connect(&format!("ws://{addr}")).await.err().unwrap();
    assert!(matches!(err, ClientError::Connection(_)));
}
