use crate::config::{Config, TransportConfig};
use crate::utils::{ensure_dir, get_courier_home};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[allow(unused_imports)]
use tracing::warn;

/// Prefix of the per-tenant env var overriding a bridge API key.
const BRIDGE_API_KEY_ENV_PREFIX: &str = "COURIER_BRIDGE_API_KEY_";

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_courier_home()?.join("config.json"))
}

pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let default_path = get_config_path().unwrap_or_else(|_| PathBuf::from("config.json"));
    let path = config_path.unwrap_or(default_path.as_path());

    let mut config = if path.exists() {
        let lock = open_lock_file(path)?;
        fs2::FileExt::lock_shared(&lock)
            .with_context(|| "Failed to acquire shared lock on config lock file")?;

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        check_file_permissions(path);

        serde_json::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse config JSON from {}", path.display()))?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    Ok(config)
}

/// Readers and writers lock a sibling file, since `atomic_write` replaces the config inode.
fn open_lock_file(path: &Path) -> Result<fs::File> {
    let lock_path = path.with_extension("json.lock");
    fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file at {}", lock_path.display()))
}

/// Env var name for a tenant's bridge API key, e.g. `COURIER_BRIDGE_API_KEY_ACME_EVENTS`.
pub fn bridge_api_key_env(tenant_id: &str) -> String {
    format!(
        "{}{}",
        BRIDGE_API_KEY_ENV_PREFIX,
        tenant_id.to_ascii_uppercase().replace('-', "_")
    )
}

fn apply_env_overrides(config: &mut Config) {
    for tenant in &mut config.tenants {
        if let TransportConfig::Bridge(bridge) = &mut tenant.transport
            && let Ok(val) = std::env::var(bridge_api_key_env(&tenant.id))
            && !val.is_empty()
        {
            bridge.api_key = val;
        }
    }
}

/// Warn if the config file has overly permissive permissions. It may hold bridge API keys.
#[cfg(unix)]
fn check_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Once;

    static WARNED: Once = Once::new();
    WARNED.call_once(|| {
        if let Ok(meta) = std::fs::metadata(path) {
            let mode = meta.permissions().mode();
            if mode & 0o077 != 0 {
                warn!(
                    "config file {} has permissions {:o}, recommend 0600",
                    path.display(),
                    mode & 0o777
                );
            }
        }
    });
}

#[cfg(not(unix))]
fn check_file_permissions(_path: &Path) {}

pub fn save_config(config: &Config, config_path: Option<&Path>) -> Result<()> {
    let default_path = get_config_path().unwrap_or_else(|_| PathBuf::from("config.json"));
    let path = config_path.unwrap_or(default_path.as_path());

    ensure_dir(path.parent().context("Config path has no parent")?)?;

    let lock = open_lock_file(path)?;
    fs2::FileExt::lock_exclusive(&lock)
        .with_context(|| "Failed to acquire exclusive lock on config lock file")?;

    let content = serde_json::to_string_pretty(config)?;
    crate::utils::atomic_write(path, &content)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }

    Ok(())
}
