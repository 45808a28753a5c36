// Shared test helpers; not all items used by every test binary.
#![allow(unused)]

use courier::config::{Config, LimitsConfig, SupervisorConfig, TenantConfig};
use courier::registry::{SessionRegistry, TenantChannel};
use courier::transport::SimulatedTransport;
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

/// Config with one simulated tenant per id and the supervisor off.
pub fn test_config(tenants: &[&str]) -> Config {
    Config {
        tenants: tenants.iter().map(|id| TenantConfig::simulated(id)).collect(),
        supervisor: SupervisorConfig {
            enabled: false,
            ..SupervisorConfig::default()
        },
        ..Config::default()
    }
}

pub fn with_limits(mut config: Config, tenant: &str, limits: LimitsConfig) -> Config {
    if let Some(t) = config.tenants.iter_mut().find(|t| t.id == tenant) {
        t.limits = limits;
    }
    config
}

/// Open a tenant on a manually approved simulated transport and walk it to Ready.
pub async fn ready_channel(
    registry: &SessionRegistry,
    tenant: &str,
) -> (Arc<SimulatedTransport>, Arc<TenantChannel>) {
    let transport = Arc::new(SimulatedTransport::manual());
    let channel = registry
        .open_with_transport(tenant, transport.clone())
        .expect("open tenant");
    channel
        .generate_auth_artifact(WAIT)
        .await
        .expect("pairing code");
    transport.authenticate();
    channel.session().wait_ready(WAIT).await.expect("ready");
    (transport, channel)
}

/// Distinct valid domestic numbers.
pub fn numbers(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("11{:09}", 900_000_000 + i)).collect()
}
