use super::*;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn bridge_for(server: &MockServer) -> BridgeTransport {
    let mut config = BridgeConfig::new(&server.uri());
    config.api_key = "bridge-key".to_string();
    config.poll_interval_ms = 10;
    BridgeTransport::new("acme", config).unwrap()
}

async fn mount_start(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/sessions/acme/start"))
        .and(header("authorization", "Bearer bridge-key"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for bridge event")
        .expect("event feed closed")
}

#[test]
fn test_format_chat_id() {
    assert_eq!(
        format_chat_id("5511999990000", "@s.whatsapp.net"),
        "5511999990000@s.whatsapp.net"
    );
    assert_eq!(
        format_chat_id("5511999990000:20@s.whatsapp.net", "@s.whatsapp.net"),
        "5511999990000@s.whatsapp.net"
    );
    assert_eq!(format_chat_id("group-1@g.us", "@s.whatsapp.net"), "group-1@g.us");
}

#[test]
fn test_session_name_override() {
    let mut config = BridgeConfig::new("http://127.0.0.1:3000/api/");
    config.session_name = Some("main phone".to_string());
    let bridge = BridgeTransport::new("acme", config).unwrap();
    assert_eq!(
        bridge.endpoints.url(&["status"]).unwrap().as_str(),
        "http://127.0.0.1:3000/api/sessions/main%20phone/status"
    );
}

#[test]
fn test_rejects_non_http_scheme() {
    assert!(BridgeTransport::new("acme", BridgeConfig::new("ftp://bridge.local")).is_err());
}

#[tokio::test]
async fn test_connect_emits_qr_then_ready() {
    let server = MockServer::start().await;
    mount_start(&server).await;
    Mock::given(method("GET"))
        .and(path("/sessions/acme/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "starting"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sessions/acme/status"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"state": "qr", "qr": "code-1"})),
        )
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sessions/acme/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "ready"})))
        .mount(&server)
        .await;

    let bridge = bridge_for(&server);
    let mut events = bridge.connect().await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::AuthArtifact("code-1".to_string())
    );
    // Repeated identical codes are not re-emitted
    assert_eq!(next_event(&mut events).await, TransportEvent::Ready);
}

#[tokio::test]
async fn test_connect_fails_when_start_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/acme/start"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let bridge = bridge_for(&server);
    assert!(bridge.connect().await.is_err());
}

#[tokio::test]
async fn test_auth_failure_status_ends_feed() {
    let server = MockServer::start().await;
    mount_start(&server).await;
    Mock::given(method("GET"))
        .and(path("/sessions/acme/status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"state": "auth_failure", "reason": "logged out"})),
        )
        .mount(&server)
        .await;

    let bridge = bridge_for(&server);
    let mut events = bridge.connect().await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::AuthFailure {
            reason: "logged out".to_string()
        }
    );
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_qr_after_ready_is_a_logout() {
    let server = MockServer::start().await;
    mount_start(&server).await;
    Mock::given(method("GET"))
        .and(path("/sessions/acme/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "ready"})))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sessions/acme/status"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"state": "qr", "qr": "code-2"})),
        )
        .mount(&server)
        .await;

    let bridge = bridge_for(&server);
    let mut events = bridge.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, TransportEvent::Ready);
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Disconnected {
            reason: "logged out".to_string()
        }
    );
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_repeated_poll_errors_disconnect() {
    let server = MockServer::start().await;
    mount_start(&server).await;
    Mock::given(method("GET"))
        .and(path("/sessions/acme/status"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let bridge = bridge_for(&server);
    let mut events = bridge.connect().await.unwrap();
    match next_event(&mut events).await {
        TransportEvent::Disconnected { reason } => assert!(reason.contains("unreachable")),
        other => panic!("expected disconnect, got {:?}", other),
    }
}

#[tokio::test]
async fn test_send_text_posts_formatted_chat() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/acme/messages"))
        .and(header("authorization", "Bearer bridge-key"))
        .and(body_json(json!({
            "chatId": "5511999990000@s.whatsapp.net",
            "text": "Reminder"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let bridge = bridge_for(&server);
    bridge.send_text("5511999990000", "Reminder").await.unwrap();
}

#[tokio::test]
async fn test_send_media_posts_caption() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/acme/messages"))
        .and(body_json(json!({
            "chatId": "5511999990000@s.whatsapp.net",
            "media": {"url": "https://cdn.example.com/a.pdf", "mimeType": "application/pdf"},
            "caption": "Agenda"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let bridge = bridge_for(&server);
    let media = MediaRef {
        url: "https://cdn.example.com/a.pdf".to_string(),
        mime_type: Some("application/pdf".to_string()),
    };
    bridge
        .send_media("5511999990000", &media, Some("Agenda"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_send_error_status_is_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/acme/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let bridge = bridge_for(&server);
    let err = bridge.send_text("5511999990000", "hi").await.unwrap_err();
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn test_is_reachable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/sessions/acme/contacts/5511000000000@s.whatsapp.net/reachable",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"reachable": false})))
        .mount(&server)
        .await;

    let bridge = bridge_for(&server);
    assert!(!bridge.is_reachable("5511000000000").await.unwrap());
}

#[tokio::test]
async fn test_disconnect_posts_stop_and_tolerates_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/acme/stop"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let bridge = bridge_for(&server);
    bridge.disconnect().await.unwrap();
}
