use super::*;

#[test]
fn rate_limit_codes_name_the_window() {
    let hour = CourierError::RateLimited {
        scope: LimitScope::Hour,
    };
    let day = CourierError::RateLimited {
        scope: LimitScope::Day,
    };
    assert_eq!(hour.code(), "HourlyLimitReached");
    assert_eq!(day.code(), "DailyLimitReached");
    assert!(hour.is_retryable());
}

#[test]
fn invalid_number_is_not_retryable() {
    let err = CourierError::InvalidNumber {
        raw: "123".to_string(),
    };
    assert!(!err.is_retryable());
    assert_eq!(err.code(), "InvalidNumber");
    assert!(err.to_string().contains("123"));
}

#[test]
fn session_not_ready_mentions_state() {
    let err = CourierError::SessionNotReady {
        state: SessionState::Disconnected,
    };
    assert!(err.is_retryable());
    assert!(err.to_string().contains("Disconnected"));
}

#[test]
fn anyhow_converts_to_internal() {
    fn fails() -> Result<(), CourierError> {
        Err(anyhow::anyhow!("boom"))?;
        Ok(())
    }
    let err = fails().unwrap_err();
    assert!(matches!(err, CourierError::Internal(_)));
    assert_eq!(err.code(), "InternalError");
}

#[test]
fn terminal_session_errors_require_operator() {
    assert!(!CourierError::Unrecoverable("gone".into()).is_retryable());
    assert!(!CourierError::AuthFailure("bad pairing".into()).is_retryable());
    assert!(CourierError::Timeout("handshake".into()).is_retryable());
}
