use super::*;
use crate::config::SupervisorConfig;
use crate::transport::SimulatedTransport;

const WAIT: Duration = Duration::from_secs(5);

fn config_with(tenants: &[&str]) -> Config {
    Config {
        tenants: tenants.iter().map(|id| TenantConfig::simulated(id)).collect(),
        supervisor: SupervisorConfig {
            enabled: false,
            ..SupervisorConfig::default()
        },
        ..Config::default()
    }
}

async fn ready_channel(
    registry: &SessionRegistry,
    tenant: &str,
) -> (Arc<SimulatedTransport>, Arc<TenantChannel>) {
    let transport = Arc::new(SimulatedTransport::manual());
    let channel = registry
        .open_with_transport(tenant, transport.clone())
        .unwrap();
    channel.generate_auth_artifact(WAIT).await.unwrap();
    transport.authenticate();
    channel.session().wait_ready(WAIT).await.unwrap();
    (transport, channel)
}

#[tokio::test]
async fn unknown_tenant_is_rejected() {
    let registry = SessionRegistry::new(config_with(&["acme"]));
    assert!(matches!(
        registry.open("globex"),
        Err(CourierError::UnknownTenant(id)) if id == "globex"
    ));
    assert!(matches!(
        registry.get("acme"),
        Err(CourierError::UnknownTenant(_))
    ));
}

#[tokio::test]
async fn open_is_idempotent_and_starts_connecting() {
    let registry = SessionRegistry::new(config_with(&["acme"]));
    let first = registry.open("acme").unwrap();
    let second = registry.open("acme").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.session().state(), SessionState::Authenticating);
    assert_eq!(first.status().transport, "simulated");
    assert_eq!(registry.tenant_ids(), vec!["acme".to_string()]);
}

#[tokio::test]
async fn tenants_are_isolated() {
    let registry = SessionRegistry::new(config_with(&["acme", "globex"]));
    let (_, acme) = ready_channel(&registry, "acme").await;
    let globex = registry
        .open_with_transport("globex", Arc::new(SimulatedTransport::manual()))
        .unwrap();

    let result = acme
        .send_bulk_messages(&["5511999990001".to_string()], "hi", Duration::ZERO)
        .await;
    assert_eq!(result.success_count, 1);
    assert_eq!(acme.message_stats().sent_this_hour, 1);
    assert_eq!(globex.message_stats().sent_this_hour, 0);
    assert!(acme.connection_status());
    assert!(!globex.connection_status());
}

#[tokio::test]
async fn generate_artifact_after_ready_reports_authenticated() {
    let registry = SessionRegistry::new(config_with(&["acme"]));
    let (_, channel) = ready_channel(&registry, "acme").await;
    assert!(matches!(
        channel.generate_auth_artifact(WAIT).await,
        Err(CourierError::AlreadyAuthenticated)
    ));
}

#[tokio::test]
async fn generate_artifact_recovers_failed_session() {
    let registry = SessionRegistry::new(config_with(&["acme"]));
    let transport = Arc::new(SimulatedTransport::manual());
    let channel = registry
        .open_with_transport("acme", transport.clone())
        .unwrap();
    channel.generate_auth_artifact(WAIT).await.unwrap();
    transport.fail_auth("logged out");
    let mut rx = channel.session().watch();
    rx.wait_for(|s| s.state == SessionState::Failed).await.unwrap();
    drop(rx);

    let artifact = channel.generate_auth_artifact(WAIT).await.unwrap();
    assert!(artifact.starts_with("courier-sim:"));
    assert_eq!(transport.connect_count(), 2);
}

#[tokio::test]
async fn update_limits_is_clamped() {
    let registry = SessionRegistry::new(config_with(&["acme"]));
    let channel = registry.open("acme").unwrap();
    let limits = channel.update_limits(1_000, 500, Duration::from_secs(1));

    assert_eq!(limits.max_per_day(), 300);
    assert_eq!(limits.max_per_hour(), 120);
    assert_eq!(limits.min_delay(), Duration::from_secs(30));
    assert_eq!(channel.message_stats().remaining_this_hour, 120);
}

#[tokio::test(start_paused = true)]
async fn cancel_bulk_stops_running_batch() {
    let registry = SessionRegistry::new(config_with(&["acme"]));
    let (transport, channel) = ready_channel(&registry, "acme").await;

    let canceller = channel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(45)).await;
        canceller.cancel_bulk();
    });
    let numbers: Vec<String> = (1..=5).map(|i| format!("551199999000{}", i)).collect();
    let result = channel
        .send_bulk_messages(&numbers, "hi", Duration::ZERO)
        .await;

    assert!(result.cancelled);
    assert_eq!(result.success_count, 2);
    assert_eq!(transport.sent().len(), 2);

    // A fresh batch is not affected by the earlier cancel
    let next = channel
        .send_bulk_messages(&numbers[..1], "again", Duration::ZERO)
        .await;
    assert_eq!(next.success_count, 1);
}

#[tokio::test]
async fn send_notification_uses_custom_message() {
    let registry = SessionRegistry::new(config_with(&["acme"]));
    let (transport, channel) = ready_channel(&registry, "acme").await;
    let result = channel
        .send_notification(
            "42",
            "Meetup",
            Utc::now(),
            &["5511999990001".to_string()],
            ReminderKind::Immediate,
            Some("Doors open at 7".to_string()),
        )
        .await;

    assert_eq!(result.success_count, 1);
    assert_eq!(transport.sent()[0].text, "Doors open at 7");
}

#[tokio::test]
async fn close_tears_down_session() {
    let registry = SessionRegistry::new(config_with(&["acme"]));
    let (_, channel) = ready_channel(&registry, "acme").await;

    assert!(registry.close("acme").await);
    assert!(!registry.close("acme").await);
    assert_eq!(channel.session().state(), SessionState::Idle);
    assert!(registry.tenant_ids().is_empty());
}

#[tokio::test]
async fn open_all_skips_bad_tenants() {
    let mut config = config_with(&["acme"]);
    let mut broken = TenantConfig::simulated("broken");
    broken.country_code = "abcd".to_string();
    config.tenants.push(broken);

    let registry = SessionRegistry::new(config);
    let opened = registry.open_all();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].id(), "acme");
    registry.close_all().await;
    assert!(registry.tenant_ids().is_empty());
}
