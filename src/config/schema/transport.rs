use crate::errors::CourierError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which channel binding a tenant's session runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TransportConfig {
    /// In-process simulated channel. Nothing leaves the process.
    #[serde(rename = "simulated")]
    Simulated(SimulatedConfig),
    /// HTTP bridge sidecar that owns the real channel connection.
    #[serde(rename = "bridge")]
    Bridge(BridgeConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Simulated(_) => "simulated",
            Self::Bridge(_) => "bridge",
        }
    }

    pub(super) fn validate(&self, tenant_id: &str) -> Result<(), CourierError> {
        match self {
            Self::Simulated(_) => Ok(()),
            Self::Bridge(bridge) => bridge.validate(tenant_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// Delay before the simulated scan completes. `None` waits for an explicit approval.
    #[serde(default = "default_auth_delay", rename = "authDelayMs")]
    pub auth_delay_ms: Option<u64>,
    /// Recipients the simulated channel reports as not registered.
    #[serde(default)]
    pub unreachable: Vec<String>,
    /// Recipients whose sends fail at the transport.
    #[serde(default)]
    pub failing: Vec<String>,
    #[serde(default, rename = "failConnect")]
    pub fail_connect: bool,
    /// Accept the connect but never emit a handshake event.
    #[serde(default)]
    pub silent: bool,
    #[serde(default, rename = "sendLatencyMs")]
    pub send_latency_ms: u64,
}

fn default_auth_delay() -> Option<u64> {
    Some(1000)
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            auth_delay_ms: default_auth_delay(),
            unreachable: Vec::new(),
            failing: Vec::new(),
            fail_connect: false,
            silent: false,
            send_latency_ms: 0,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    #[serde(default, rename = "apiKey")]
    pub api_key: String,
    /// Session name on the bridge. Defaults to the tenant id.
    #[serde(default, rename = "sessionName")]
    pub session_name: Option<String>,
    #[serde(default = "default_poll_interval", rename = "pollIntervalMs")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_chat_suffix", rename = "chatSuffix")]
    pub chat_suffix: String,
    #[serde(default = "default_request_timeout", rename = "requestTimeoutSecs")]
    pub request_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_chat_suffix() -> String {
    "@s.whatsapp.net".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

redact_debug!(
    BridgeConfig,
    base_url,
    redact(api_key),
    session_name,
    poll_interval_ms,
    chat_suffix,
    request_timeout_secs,
);

impl BridgeConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: String::new(),
            session_name: None,
            poll_interval_ms: default_poll_interval(),
            chat_suffix: default_chat_suffix(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self, tenant_id: &str) -> Result<(), CourierError> {
        let parsed = url::Url::parse(&self.base_url).map_err(|e| {
            CourierError::Config(format!(
                "tenants.{}.transport.baseUrl {:?} is not a valid URL: {}",
                tenant_id, self.base_url, e
            ))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CourierError::Config(format!(
                "tenants.{}.transport.baseUrl must use http or https",
                tenant_id
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(CourierError::Config(format!(
                "tenants.{}.transport.pollIntervalMs must be > 0",
                tenant_id
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(CourierError::Config(format!(
                "tenants.{}.transport.requestTimeoutSecs must be > 0",
                tenant_id
            )));
        }
        Ok(())
    }
}
