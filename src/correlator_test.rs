use serde_json::json;
use tokio::sync::mpsc;

use super::*;

struct Fixture {
    correlator: Arc<Correlator>,
    auth: Arc<AuthInjector>,
    outbox: Arc<Outbox>,
    wire: mpsc::UnboundedReceiver<Frame>,
}

fn fixture() -> Fixture {
    let outbox = Arc::new(Outbox::new());
    let auth = Arc::new(AuthInjector::default());
    let (tx, wire) = mpsc::unbounded_channel();
    outbox.install(tx);
    let correlator = Arc::new(Correlator::new(
        Arc::clone(&outbox),
        Arc::clone(&auth),
        Duration::from_secs(10),
    ));
    Fixture { correlator, auth, outbox, wire }
}

fn spawn_request(
    correlator: &Arc<Correlator>,
    topic: &'static str,
    action: &'static str,
    options: RequestOptions,
) -> tokio::task::JoinHandle<Result<Frame, ClientError>> {
    let correlator = Arc::clone(correlator);
    tokio::spawn(async move { correlator.request(topic, action, json!({}), options).await })
}

async fn next_request(wire: &mut mpsc::UnboundedReceiver<Frame>) -> Frame {
    let frame = wire.recv().await.unwrap();
    assert_eq!(frame.kind, FrameType::Request);
    frame
}

fn reply(to: &Frame) -> Frame {
    Frame::new(FrameType::Data, to.topic.clone())
        .with_action(to.action.clone().unwrap())
        .with_request_id(to.request_id.clone().unwrap())
}

#[tokio::test]
async fn reply_with_matching_id_resolves_request() {
    let mut fx = fixture();
    let call = spawn_request(&fx.correlator, "wallet", "getBalance", RequestOptions::default());

    let sent = next_request(&mut fx.wire).await;
    assert_eq!(sent.topic, "wallet");
    assert_eq!(sent.action.as_deref(), Some("getBalance"));
    assert!(uuid::Uuid::parse_str(sent.request_id.as_deref().unwrap()).is_ok());

    // Unrelated traffic first.
    assert!(!fx.correlator.settle(&Frame::new(FrameType::Data, "market-data")));
    assert!(fx.correlator.settle(&reply(&sent).with_data(json!({"balance": 12}))));

    let frame = call.await.unwrap().unwrap();
    assert_eq!(frame.data["balance"], 12);
    assert_eq!(fx.correlator.pending_count(), 0);
}

#[tokio::test]
async fn id_echoed_inside_data_is_honoured() {
    let mut fx = fixture();
    let call = spawn_request(&fx.correlator, "portfolio", "get", RequestOptions::default());
    let sent = next_request(&mut fx.wire).await;

    let echo = Frame::new(FrameType::Data, "portfolio")
        .with_data(json!({"requestId": sent.request_id.clone().unwrap(), "value": 1}));
    assert!(fx.correlator.settle(&echo));
    assert_eq!(call.await.unwrap().unwrap().data["value"], 1);
}

#[tokio::test]
async fn unknown_id_does_not_fall_back() {
    let mut fx = fixture();
    let _call = spawn_request(&fx.correlator, "wallet", "get", RequestOptions::default());
    next_request(&mut fx.wire).await;

    let stray = Frame::new(FrameType::Data, "wallet")
        .with_action("get")
        .with_request_id("someone-else");
    assert!(!fx.correlator.settle(&stray));
    assert_eq!(fx.correlator.pending_count(), 1);
}

#[tokio::test]
async fn fallback_settles_oldest_matching_entry() {
    let mut fx = fixture();
    let first = spawn_request(&fx.correlator, "legacy", "list", RequestOptions::default());
    next_request(&mut fx.wire).await;
    let second = spawn_request(&fx.correlator, "legacy", "list", RequestOptions::default());
    next_request(&mut fx.wire).await;

    let bare = |n: u64| {
        Frame::new(FrameType::Request, "legacy")
            .with_action("list")
            .with_data(json!({ "n": n }))
    };
    assert!(fx.correlator.settle(&bare(1)));
    assert!(fx.correlator.settle(&bare(2)));

    assert_eq!(first.await.unwrap().unwrap().data["n"], 1);
    assert_eq!(second.await.unwrap().unwrap().data["n"], 2);
}

#[tokio::test]
async fn error_reply_becomes_application_error() {
    let mut fx = fixture();
    let call = spawn_request(&fx.correlator, "orders", "place", RequestOptions::default());
    let sent = next_request(&mut fx.wire).await;

    let err_frame = Frame::new(FrameType::Error, "orders")
        .with_request_id(sent.request_id.clone().unwrap())
        .with_data(json!({"message": "insufficient funds"}));
    assert!(fx.correlator.settle(&err_frame));

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        ClientError::Application { ref topic, ref action, ref message }
            if topic == "orders" && action == "place" && message == "insufficient funds"
    ));
}

#[tokio::test(start_paused = true)]
async fn request_times_out_and_late_reply_is_ignored() {
    let mut fx = fixture();
    let options = RequestOptions::default().timeout(Duration::from_millis(500));
    let call = spawn_request(&fx.correlator, "slow", "op", options);
    let sent = next_request(&mut fx.wire).await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::RequestTimeout { timeout_ms: 500, .. }));
    assert_eq!(fx.correlator.pending_count(), 0);

    assert!(!fx.correlator.settle(&reply(&sent)));
}

#[tokio::test(start_paused = true)]
async fn default_timeout_applies_without_override() {
    let mut fx = fixture();
    let call = spawn_request(&fx.correlator, "slow", "op", RequestOptions::default());
    next_request(&mut fx.wire).await;

    let started = tokio::time::Instant::now();
    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::RequestTimeout { timeout_ms: 10_000, .. }));
    assert!(started.elapsed() >= Duration::from_secs(10));
}

#[tokio::test]
async fn reject_all_fails_every_pending_request() {
    let mut fx = fixture();
    let a = spawn_request(&fx.correlator, "a", "x", RequestOptions::default());
    let b = spawn_request(&fx.correlator, "b", "y", RequestOptions::default());
    next_request(&mut fx.wire).await;
    next_request(&mut fx.wire).await;

    assert_eq!(fx.correlator.reject_all(&ClientError::ConnectionLost), 2);

    assert!(matches!(a.await.unwrap(), Err(ClientError::ConnectionLost)));
    assert!(matches!(b.await.unwrap(), Err(ClientError::ConnectionLost)));
    assert_eq!(fx.correlator.pending_count(), 0);
}

#[tokio::test]
async fn reject_auth_required_spares_public_requests() {
    let mut fx = fixture();
    fx.auth.set_authenticated(true);
    let private = spawn_request(&fx.correlator, "wallet", "get", RequestOptions::default().authenticated());
    let public = spawn_request(&fx.correlator, "market", "get", RequestOptions::default());
    next_request(&mut fx.wire).await;
    next_request(&mut fx.wire).await;

    let err = ClientError::Authentication("token expired".into());
    assert_eq!(fx.correlator.reject_auth_required(&err), 1);
    assert!(matches!(private.await.unwrap(), Err(ClientError::Authentication(_))));
    assert_eq!(fx.correlator.pending_count(), 1);
    public.abort();
}

#[tokio::test]
async fn require_auth_fails_fast_when_unauthenticated() {
    let mut fx = fixture();
    let err = fx
        .correlator
        .request("wallet", "get", json!({}), RequestOptions::default().authenticated())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Authentication(_)));
    assert!(fx.wire.try_recv().is_err(), "nothing should be sent");
}

#[tokio::test]
async fn request_without_session_is_not_connected() {
    let fx = fixture();
    fx.outbox.clear();

    let err = fx
        .correlator
        .request("market", "get", json!({}), RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
    assert_eq!(fx.correlator.pending_count(), 0);
}

#[tokio::test]
async fn dropping_the_future_removes_the_entry() {
    let mut fx = fixture();
    let call = spawn_request(&fx.correlator, "a", "x", RequestOptions::default());
    next_request(&mut fx.wire).await;
    assert_eq!(fx.correlator.pending_count(), 1);

    call.abort();
    assert!(call.await.unwrap_err().is_cancelled());
    assert_eq!(fx.correlator.pending_count(), 0);
}
