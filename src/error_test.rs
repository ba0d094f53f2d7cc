use super::*;

#[test]
fn timeout_error_reports_millis() {
    let err = ClientError::timeout("market-data", "getPrice", Duration::from_millis(1500));
    assert_eq!(err.to_string(), "request market-data/getPrice timed out after 1500ms");
}

#[test]
fn connection_level_errors_are_retryable() {
    assert!(ClientError::ConnectionLost.is_retryable());
    assert!(ClientError::NotConnected.is_retryable());
    assert!(ClientError::AbnormalClosure("reset".into()).is_retryable());
    assert!(ClientError::timeout("t", "a", Duration::from_secs(1)).is_retryable());
}

#[test]
fn application_and_auth_errors_are_not_retryable() {
    let app = ClientError::Application {
        topic: "contest:42".into(),
        action: "join".into(),
        message: "contest full".into(),
    };
    assert!(!app.is_retryable());
    assert!(!ClientError::Authentication("expired".into()).is_retryable());
    assert!(!ClientError::UnsubscribeUnderflow(vec!["t".into()]).is_retryable());
}

#[test]
fn codec_errors_convert() {
    let codec = frames::decode_frame("nope").expect_err("decode should fail");
    let err = ClientError::from(codec);
    assert!(matches!(err, ClientError::Codec(_)));
}
