use super::*;
use crate::config::{BridgeConfig, SimulatedConfig};

#[test]
fn create_simulated_transport() {
    let transport =
        create_transport("acme", &TransportConfig::Simulated(SimulatedConfig::default())).unwrap();
    assert_eq!(transport.name(), "simulated");
}

#[test]
fn create_bridge_transport() {
    let transport = create_transport(
        "acme",
        &TransportConfig::Bridge(BridgeConfig::new("http://127.0.0.1:3000")),
    )
    .unwrap();
    assert_eq!(transport.name(), "bridge");
}

#[test]
fn create_bridge_transport_rejects_bad_url() {
    let result = create_transport(
        "acme",
        &TransportConfig::Bridge(BridgeConfig::new("::nope::")),
    );
    assert!(result.is_err());
}

#[test]
fn media_ref_serializes_camel_case() {
    let media = MediaRef {
        url: "https://cdn.example.com/a.png".to_string(),
        mime_type: Some("image/png".to_string()),
    };
    let json = serde_json::to_value(&media).unwrap();
    assert_eq!(json["mimeType"], "image/png");

    let bare = MediaRef {
        url: "https://cdn.example.com/a.png".to_string(),
        mime_type: None,
    };
    let json = serde_json::to_value(&bare).unwrap();
    assert!(json.get("mimeType").is_none());
}
