mod subcommands;

#[cfg(test)]
mod tests;

use crate::config::{Config, TenantConfig, load_config};
use crate::errors::CourierError;
use crate::registry::{SessionRegistry, TenantChannel};
use crate::scheduler::ReminderKind;
use crate::session::SessionEventKind;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Outbound messaging sessions and rate-limited notification dispatch")]
pub struct Cli {
    /// Config file (default: $COURIER_HOME/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config with one simulated tenant
    Init {
        #[arg(long, default_value = "default")]
        tenant: String,
        /// Replace an existing config
        #[arg(long)]
        force: bool,
    },
    /// Open every tenant, keep sessions connected and run scheduled reminders
    Serve {
        /// Log each tenant's status at this interval (0 disables)
        #[arg(long, default_value = "300")]
        status_interval_secs: u64,
    },
    /// Send one text message
    Send {
        #[arg(long, short = 't')]
        tenant: Option<String>,
        #[arg(long)]
        to: String,
        #[arg(long, short = 'm')]
        message: String,
    },
    /// Send the same text to many numbers, paced by the tenant's minimum delay
    Bulk {
        #[arg(long, short = 't')]
        tenant: Option<String>,
        /// Comma-separated numbers
        #[arg(long, value_delimiter = ',')]
        to: Vec<String>,
        /// File with one number per line ('#' starts a comment)
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long, short = 'm')]
        message: String,
        /// Requested pause between sends; raised to the tenant minimum
        #[arg(long, default_value = "30")]
        delay_secs: u64,
    },
    /// Notify event participants now, or schedule the standard reminders and wait for them
    Remind {
        #[arg(long, short = 't')]
        tenant: Option<String>,
        #[arg(long)]
        event: String,
        #[arg(long)]
        title: String,
        /// Event start time (RFC 3339, e.g. 2026-03-01T18:30:00Z)
        #[arg(long)]
        at: String,
        #[arg(long, value_delimiter = ',', required = true)]
        to: Vec<String>,
        /// Send this kind immediately instead of scheduling (one-week, one-day, one-hour, immediate)
        #[arg(long)]
        kind: Option<ReminderKind>,
        /// Custom text for an immediate send
        #[arg(long, short = 'm')]
        message: Option<String>,
    },
    /// Show configured tenants and their limits
    Status {
        #[arg(long)]
        json: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { tenant, force } => {
            init(config_path, &tenant, force)?;
        }
        Commands::Serve {
            status_interval_secs,
        } => {
            subcommands::serve(load_config(config_path)?, status_interval_secs).await?;
        }
        Commands::Send {
            tenant,
            to,
            message,
        } => {
            subcommands::send(load_config(config_path)?, tenant, &to, &message).await?;
        }
        Commands::Bulk {
            tenant,
            to,
            file,
            message,
            delay_secs,
        } => {
            let mut numbers = to;
            if let Some(file) = file {
                let content = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                numbers.extend(read_numbers(&content));
            }
            subcommands::bulk(load_config(config_path)?, tenant, &numbers, &message, delay_secs)
                .await?;
        }
        Commands::Remind {
            tenant,
            event,
            title,
            at,
            to,
            kind,
            message,
        } => {
            let event_time = chrono::DateTime::parse_from_rfc3339(&at)
                .with_context(|| format!("Invalid --at time {:?}", at))?
                .with_timezone(&chrono::Utc);
            subcommands::remind(
                load_config(config_path)?,
                tenant,
                subcommands::Reminder {
                    event_id: event,
                    title,
                    event_time,
                    recipients: to,
                    kind,
                    message,
                },
            )
            .await?;
        }
        Commands::Status { json } => {
            subcommands::status(&load_config(config_path)?, config_path, json)?;
        }
    }

    Ok(())
}

fn init(config_path: Option<&Path>, tenant: &str, force: bool) -> Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => crate::config::get_config_path()?,
    };
    if path.exists() && !force {
        bail!(
            "Config already exists at {} (use --force to replace it)",
            path.display()
        );
    }

    let config = Config {
        tenants: vec![TenantConfig::simulated(tenant)],
        ..Config::default()
    };
    config.validate()?;
    crate::config::save_config(&config, Some(path.as_path()))?;
    println!("\u{2713} Created config at {}", path.display());
    println!(
        "Tenant '{}' uses the simulated transport. Switch it to a bridge to reach a real channel.",
        tenant
    );
    Ok(())
}

/// Resolve which tenant a one-shot command targets.
fn pick_tenant(config: &Config, requested: Option<String>) -> Result<String> {
    match requested {
        Some(id) => {
            if config.tenant(&id).is_none() {
                return Err(CourierError::UnknownTenant(id).into());
            }
            Ok(id)
        }
        None => match config.tenants.as_slice() {
            [only] => Ok(only.id.clone()),
            [] => bail!("No tenants configured (run: courier init)"),
            _ => bail!("Several tenants configured; choose one with --tenant"),
        },
    }
}

/// Numbers from a list file: one per line, blank lines and `#` comments skipped.
fn read_numbers(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn print_artifact(tenant: &str, artifact: &str) {
    println!("\n\u{1f4f1} Pairing code for tenant '{}':", tenant);
    match qr2term::print_qr(artifact) {
        Ok(()) => {}
        Err(e) => {
            warn!("qr2term failed: {}, falling back to qrcode crate", e);
            match qrcode::QrCode::new(artifact) {
                Ok(qr) => {
                    let string = qr
                        .render::<char>()
                        .quiet_zone(false)
                        .module_dimensions(2, 1)
                        .build();
                    println!("{}", string);
                }
                Err(e2) => {
                    warn!("Failed to render QR code: {}", e2);
                    println!("Raw pairing code: {}", artifact);
                }
            }
        }
    }
    println!("Scan it from the channel app's linked devices screen.");
}

/// Open a tenant and block until its session is Ready, printing pairing codes as they arrive.
async fn connect_tenant(registry: &SessionRegistry, tenant: &str) -> Result<Arc<TenantChannel>> {
    let channel = registry.open(tenant)?;
    let session_config = &registry.config().session;
    let mut events = channel.session().subscribe();

    let mut shown = match channel
        .generate_auth_artifact(session_config.auth_artifact_timeout())
        .await
    {
        Ok(artifact) => {
            print_artifact(tenant, &artifact);
            artifact
        }
        Err(CourierError::AlreadyAuthenticated) => return Ok(channel),
        Err(e) => return Err(e.into()),
    };

    let session = channel.session().clone();
    let ready = session.wait_ready(session_config.ready_timeout());
    tokio::pin!(ready);
    loop {
        tokio::select! {
            result = &mut ready => {
                result?;
                info!("tenant {} connected", tenant);
                println!("\u{2713} Connected");
                return Ok(channel);
            }
            event = events.recv() => {
                if let Ok(event) = event
                    && let SessionEventKind::ArtifactProduced(artifact) = event.kind
                    && artifact != shown
                {
                    print_artifact(tenant, &artifact);
                    shown = artifact;
                }
            }
        }
    }
}
