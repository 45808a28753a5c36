use super::*;
use crate::config::LimitsConfig;

fn config_with(ids: &[&str]) -> Config {
    Config {
        tenants: ids.iter().map(|id| TenantConfig::simulated(id)).collect(),
        ..Config::default()
    }
}

#[test]
fn test_pick_tenant_single_default() {
    let config = config_with(&["acme"]);
    assert_eq!(pick_tenant(&config, None).unwrap(), "acme");
}

#[test]
fn test_pick_tenant_requires_choice_when_ambiguous() {
    let config = config_with(&["acme", "globex"]);
    let err = pick_tenant(&config, None).unwrap_err();
    assert!(err.to_string().contains("--tenant"));
    assert_eq!(
        pick_tenant(&config, Some("globex".to_string())).unwrap(),
        "globex"
    );
}

#[test]
fn test_pick_tenant_unknown_and_empty() {
    let err = pick_tenant(&config_with(&["acme"]), Some("nope".to_string())).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CourierError>(),
        Some(CourierError::UnknownTenant(_))
    ));
    assert!(pick_tenant(&config_with(&[]), None).is_err());
}

#[test]
fn test_read_numbers_skips_comments_and_blanks() {
    let content = "# volunteers\n5511999990001\n\n  (11) 99999-0002  # Ana\n#5511999990003\n";
    assert_eq!(
        read_numbers(content),
        vec!["5511999990001".to_string(), "(11) 99999-0002".to_string()]
    );
}

#[test]
fn test_init_writes_simulated_tenant() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    init(Some(&path), "acme", false).unwrap();
    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.tenants.len(), 1);
    assert_eq!(config.tenants[0].id, "acme");
    assert_eq!(config.tenants[0].transport.kind(), "simulated");
}

#[test]
fn test_init_refuses_to_overwrite_without_force() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    init(Some(&path), "acme", false).unwrap();

    assert!(init(Some(&path), "globex", false).is_err());
    init(Some(&path), "globex", true).unwrap();
    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.tenants[0].id, "globex");
}

#[test]
fn test_init_rejects_invalid_tenant_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    assert!(init(Some(&path), "bad tenant!", false).is_err());
    assert!(!path.exists());
}

#[test]
fn test_parse_bulk_command() {
    let cli = Cli::try_parse_from([
        "courier",
        "bulk",
        "--tenant",
        "acme",
        "--to",
        "5511999990001,5511999990002",
        "-m",
        "hello",
    ])
    .unwrap();
    match cli.command {
        Commands::Bulk {
            tenant,
            to,
            file,
            message,
            delay_secs,
        } => {
            assert_eq!(tenant.as_deref(), Some("acme"));
            assert_eq!(to.len(), 2);
            assert!(file.is_none());
            assert_eq!(message, "hello");
            assert_eq!(delay_secs, 30);
        }
        _ => panic!("expected bulk command"),
    }
}

#[test]
fn test_parse_remind_kind() {
    let cli = Cli::try_parse_from([
        "courier",
        "--config",
        "/tmp/courier.json",
        "remind",
        "--event",
        "42",
        "--title",
        "Meetup",
        "--at",
        "2026-03-01T18:30:00Z",
        "--to",
        "5511999990001",
        "--kind",
        "one-day",
    ])
    .unwrap();
    assert_eq!(cli.config.as_deref(), Some(Path::new("/tmp/courier.json")));
    match cli.command {
        Commands::Remind { kind, .. } => assert_eq!(kind, Some(ReminderKind::OneDay)),
        _ => panic!("expected remind command"),
    }

    assert!(
        Cli::try_parse_from([
            "courier", "remind", "--event", "42", "--title", "T", "--at", "x", "--to", "1",
            "--kind", "fortnight",
        ])
        .is_err()
    );
}

#[test]
fn test_status_json_reports_clamped_limits() {
    let mut config = config_with(&["acme"]);
    config.tenants[0].limits = LimitsConfig {
        max_per_hour: 500,
        max_per_day: 50,
        min_delay_secs: 5,
    };
    subcommands::status(&config, None, true).unwrap();
    let limits = config.tenants[0].limits.to_limits();
    assert_eq!(limits.max_per_hour(), 120);
    assert_eq!(limits.min_delay(), std::time::Duration::from_secs(30));
}

#[tokio::test]
async fn test_connect_tenant_waits_for_ready() {
    let mut config = config_with(&["acme"]);
    config.supervisor.enabled = false;
    if let crate::config::TransportConfig::Simulated(sim) = &mut config.tenants[0].transport {
        sim.auth_delay_ms = Some(50);
    }
    let registry = SessionRegistry::new(config);

    let channel = connect_tenant(&registry, "acme").await.unwrap();
    assert!(channel.connection_status());

    // Already paired: returns without waiting on a new pairing code
    let again = connect_tenant(&registry, "acme").await.unwrap();
    assert!(Arc::ptr_eq(&channel, &again));
    registry.close_all().await;
}
