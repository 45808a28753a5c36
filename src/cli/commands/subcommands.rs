use super::{connect_tenant, pick_tenant, print_artifact};
use crate::config::Config;
use crate::dispatch::{BulkSendResult, SendRequest};
use crate::registry::SessionRegistry;
use crate::scheduler::ReminderKind;
use crate::session::SessionEventKind;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

pub(super) struct Reminder {
    pub event_id: String,
    pub title: String,
    pub event_time: DateTime<Utc>,
    pub recipients: Vec<String>,
    pub kind: Option<ReminderKind>,
    pub message: Option<String>,
}

pub(super) async fn serve(config: Config, status_interval_secs: u64) -> Result<()> {
    if config.tenants.is_empty() {
        anyhow::bail!("No tenants configured (run: courier init)");
    }
    let registry = Arc::new(SessionRegistry::new(config));
    let channels = registry.open_all();
    println!("\u{1f4e8} courier serving {} tenant(s)", channels.len());

    let mut watchers = Vec::new();
    for channel in &channels {
        let tenant = channel.id().to_string();
        let mut events = channel.session().subscribe();
        if let Some(artifact) = channel.session().snapshot().auth_artifact {
            print_artifact(&tenant, &artifact);
        }
        watchers.push(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match event.kind {
                        SessionEventKind::ArtifactProduced(artifact) => {
                            print_artifact(&tenant, &artifact);
                        }
                        SessionEventKind::StateChanged { from, to } => {
                            info!("tenant {}: {} -> {}", tenant, from, to);
                        }
                        SessionEventKind::AuthFailed { reason } => {
                            warn!("tenant {}: authentication failed: {}", tenant, reason);
                        }
                    },
                    Err(RecvError::Lagged(n)) => {
                        warn!("tenant {}: missed {} session events", tenant, n);
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        }));
    }

    if status_interval_secs > 0 {
        let registry = registry.clone();
        watchers.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(status_interval_secs));
            interval.tick().await;
            loop {
                interval.tick().await;
                for id in registry.tenant_ids() {
                    if let Ok(channel) = registry.get(&id) {
                        match serde_json::to_string(&channel.status()) {
                            Ok(status) => info!("status {}", status),
                            Err(e) => warn!("could not encode status for {}: {}", id, e),
                        }
                    }
                }
            }
        }));
    }

    info!("courier is running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    for watcher in watchers {
        watcher.abort();
    }
    registry.close_all().await;
    Ok(())
}

pub(super) async fn send(
    config: Config,
    tenant: Option<String>,
    to: &str,
    message: &str,
) -> Result<()> {
    let tenant = pick_tenant(&config, tenant)?;
    let registry = SessionRegistry::new(config);
    let channel = connect_tenant(&registry, &tenant).await?;

    let outcome = channel
        .dispatcher()
        .send(&SendRequest::text(to, message))
        .await;
    registry.close_all().await;
    let receipt = outcome?;
    println!("\u{2713} Sent to {}", receipt.recipient);
    Ok(())
}

pub(super) async fn bulk(
    config: Config,
    tenant: Option<String>,
    numbers: &[String],
    message: &str,
    delay_secs: u64,
) -> Result<()> {
    if numbers.is_empty() {
        anyhow::bail!("No recipients given (use --to or --file)");
    }
    let tenant = pick_tenant(&config, tenant)?;
    let registry = SessionRegistry::new(config);
    let channel = connect_tenant(&registry, &tenant).await?;

    let canceller = channel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nCancelling after the current message...");
            canceller.cancel_bulk();
        }
    });
    let result = channel
        .send_bulk_messages(numbers, message, Duration::from_secs(delay_secs))
        .await;
    ctrl_c.abort();
    registry.close_all().await;

    print_bulk_result(&result);
    Ok(())
}

pub(super) async fn remind(
    config: Config,
    tenant: Option<String>,
    reminder: Reminder,
) -> Result<()> {
    let tenant = pick_tenant(&config, tenant)?;
    let registry = SessionRegistry::new(config);
    let channel = connect_tenant(&registry, &tenant).await?;

    if let Some(kind) = reminder.kind {
        let result = channel
            .send_notification(
                &reminder.event_id,
                &reminder.title,
                reminder.event_time,
                &reminder.recipients,
                kind,
                reminder.message,
            )
            .await;
        registry.close_all().await;
        print_bulk_result(&result);
        return Ok(());
    }

    let plans = channel
        .schedule_event(
            &reminder.event_id,
            &reminder.title,
            reminder.event_time,
            &reminder.recipients,
        )
        .await;
    if plans.is_empty() {
        println!("Nothing to schedule: every reminder time has already passed.");
        registry.close_all().await;
        return Ok(());
    }
    for plan in &plans {
        println!("  {} at {}", plan.kind, plan.firing_at.to_rfc3339());
    }
    println!("Waiting for reminders to fire (Ctrl+C to cancel)...");

    let mut tick = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let cancelled = channel.cancel_event(&reminder.event_id).await;
                println!("\nCancelled {} pending reminder(s)", cancelled);
                break;
            }
            _ = tick.tick() => {
                if channel.scheduler().active_tasks().await == 0 {
                    println!("\u{2713} All reminders fired");
                    break;
                }
            }
        }
    }
    registry.close_all().await;
    Ok(())
}

pub(super) fn status(
    config: &Config,
    config_path: Option<&std::path::Path>,
    json: bool,
) -> Result<()> {
    if json {
        let tenants: Vec<serde_json::Value> = config
            .tenants
            .iter()
            .map(|t| {
                let limits = t.limits.to_limits();
                serde_json::json!({
                    "id": t.id,
                    "transport": t.transport.kind(),
                    "countryCode": t.country_code,
                    "maxPerHour": limits.max_per_hour(),
                    "maxPerDay": limits.max_per_day(),
                    "minDelaySecs": limits.min_delay().as_secs(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&tenants)?);
        return Ok(());
    }

    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => crate::config::get_config_path()?,
    };
    println!("\u{1f4e8} courier status\n");
    println!(
        "Config: {} {}",
        path.display(),
        if path.exists() { "\u{2713}" } else { "\u{2717}" }
    );
    if config.tenants.is_empty() {
        println!("Tenants: none (run: courier init)");
        return Ok(());
    }
    for tenant in &config.tenants {
        let limits = tenant.limits.to_limits();
        println!(
            "  {:<16} {:<10} +{:<4} {}/hour {}/day min delay {}s",
            tenant.id,
            tenant.transport.kind(),
            tenant.country_code,
            limits.max_per_hour(),
            limits.max_per_day(),
            limits.min_delay().as_secs()
        );
    }
    println!(
        "Supervisor: {}",
        if config.supervisor.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    Ok(())
}

fn print_bulk_result(result: &BulkSendResult) {
    println!(
        "Sent {}, failed {}, skipped {}{}{}",
        result.success_count,
        result.failed_count,
        result.skipped_count,
        if result.stopped { " (stopped early)" } else { "" },
        if result.cancelled { " (cancelled)" } else { "" }
    );
    for error in &result.errors {
        println!("  \u{2717} {}: {} ({})", error.recipient, error.reason, error.detail);
    }
}
