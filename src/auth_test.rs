use super::*;

#[test]
fn new_without_token_yields_no_auth_frame() {
    let auth = AuthInjector::new(None);
    assert!(auth.auth_frame().is_none());
    assert!(!auth.is_authenticated());
}

#[test]
fn empty_token_is_treated_as_absent() {
    let auth = AuthInjector::new(Some(String::new()));
    assert!(auth.token().is_none());

    auth.set_token(Some(String::new()));
    assert!(auth.auth_frame().is_none());
}

#[test]
fn auth_frame_carries_current_token() {
    let auth = AuthInjector::new(Some("t-1".into()));
    auth.set_token(Some("t-2".into()));
    let frame = auth.auth_frame().expect("frame");
    assert_eq!(frame.kind, FrameType::Auth);
    assert_eq!(frame.data[frames::DATA_TOKEN], "t-2");
}

#[test]
fn set_token_notifies_watchers_only_on_change() {
    let auth = AuthInjector::new(Some("same".into()));
    let mut rx = auth.watch_token();

    auth.set_token(Some("same".into()));
    assert!(!rx.has_changed().expect("sender alive"));

    auth.set_token(None);
    assert!(rx.has_changed().expect("sender alive"));
    assert!(rx.borrow_and_update().is_none());
}

#[test]
fn authenticated_flag_is_observable() {
    let auth = AuthInjector::default();
    let mut rx = auth.watch_authenticated();

    auth.set_authenticated(true);
    assert!(auth.is_authenticated());
    assert!(rx.has_changed().expect("sender alive"));
    assert!(*rx.borrow_and_update());

    auth.set_authenticated(true);
    assert!(!rx.has_changed().expect("sender alive"));
}

#[test]
fn plain_ack_is_accepted() {
    let ack = Frame::new(FrameType::Auth, "").with_data(serde_json::json!({"status": "ok"}));
    assert!(AuthInjector::evaluate_ack(&ack).is_ok());

    let bare = Frame::new(FrameType::Auth, "");
    assert!(AuthInjector::evaluate_ack(&bare).is_ok());
}

#[test]
fn error_ack_is_rejected_with_message() {
    let nack = Frame::new(FrameType::Auth, "").with_data(serde_json::json!({"error": "token expired"}));
    let err = AuthInjector::evaluate_ack(&nack).expect_err("should reject");
    assert!(matches!(err, ClientError::Authentication(ref m) if m == "token expired"));
}

#[test]
fn status_error_ack_is_rejected() {
    let nack = Frame::new(FrameType::Auth, "").with_data(serde_json::json!({"status": "ERROR"}));
    let err = AuthInjector::evaluate_ack(&nack).expect_err("should reject");
    assert!(matches!(err, ClientError::Authentication(ref m) if m == "token rejected"));
}
