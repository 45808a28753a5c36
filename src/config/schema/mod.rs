use crate::errors::CourierError;
use crate::limiter::RateLimits;
use crate::phone::{DEFAULT_COUNTRY_CODE, PhoneNormalizer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Generate a `Debug` impl that redacts sensitive fields.
///
/// Usage:
/// ```ignore
/// redact_debug!(StructName, field1, redact(secret_field), field2);
/// ```
macro_rules! redact_debug {
    (@field $builder:ident, $self:ident, redact($field:ident)) => {
        $builder.field(
            stringify!($field),
            &if $self.$field.is_empty() {
                "[empty]"
            } else {
                "[REDACTED]"
            },
        );
    };
    (@field $builder:ident, $self:ident, $field:ident) => {
        $builder.field(stringify!($field), &$self.$field);
    };

    (@fields $builder:ident, $self:ident,) => {};
    (@fields $builder:ident, $self:ident, redact($field:ident), $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, redact($field));
        redact_debug!(@fields $builder, $self, $($rest)*);
    };
    (@fields $builder:ident, $self:ident, $field:ident, $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, $field);
        redact_debug!(@fields $builder, $self, $($rest)*);
    };

    ($struct_name:ident, $($fields:tt)*) => {
        impl std::fmt::Debug for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut builder = f.debug_struct(stringify!($struct_name));
                redact_debug!(@fields builder, self, $($fields)*);
                builder.finish()
            }
        }
    };
}

// Declared after the macro so it can use `redact_debug!`
mod transport;

pub use transport::*;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Window for the transport to acknowledge a connect before the session fails.
    #[serde(default = "default_handshake_timeout", rename = "handshakeTimeoutSecs")]
    pub handshake_timeout_secs: u64,
    #[serde(
        default = "default_auth_artifact_timeout",
        rename = "authArtifactTimeoutSecs"
    )]
    pub auth_artifact_timeout_secs: u64,
    /// How long one-shot CLI commands wait for a scan before giving up.
    #[serde(default = "default_ready_timeout", rename = "readyTimeoutSecs")]
    pub ready_timeout_secs: u64,
}

fn default_handshake_timeout() -> u64 {
    60
}

fn default_auth_artifact_timeout() -> u64 {
    120
}

fn default_ready_timeout() -> u64 {
    300
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout(),
            auth_artifact_timeout_secs: default_auth_artifact_timeout(),
            ready_timeout_secs: default_ready_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn auth_artifact_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_artifact_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-message transport timeout, independent of pacing.
    #[serde(default = "default_send_timeout", rename = "sendTimeoutSecs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_queue_capacity", rename = "queueCapacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_true", rename = "checkReachability")]
    pub check_reachability: bool,
    /// Number of (correlation id, recipient) pairs remembered for duplicate suppression.
    #[serde(default = "default_dedupe_capacity", rename = "dedupeCapacity")]
    pub dedupe_capacity: usize,
}

fn default_send_timeout() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    256
}

fn default_dedupe_capacity() -> usize {
    10_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: default_send_timeout(),
            queue_capacity: default_queue_capacity(),
            check_reachability: true,
            dedupe_capacity: default_dedupe_capacity(),
        }
    }
}

impl DispatchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderTemplates {
    #[serde(default = "default_one_week_template", rename = "oneWeek")]
    pub one_week: String,
    #[serde(default = "default_one_day_template", rename = "oneDay")]
    pub one_day: String,
    #[serde(default = "default_one_hour_template", rename = "oneHour")]
    pub one_hour: String,
    #[serde(default = "default_immediate_template")]
    pub immediate: String,
}

fn default_one_week_template() -> String {
    "Reminder: \"{title}\" is one week away ({when}).".to_string()
}

fn default_one_day_template() -> String {
    "Reminder: \"{title}\" is tomorrow ({when}).".to_string()
}

fn default_one_hour_template() -> String {
    "Reminder: \"{title}\" starts in one hour ({when}).".to_string()
}

fn default_immediate_template() -> String {
    "\"{title}\" is scheduled for {when}.".to_string()
}

impl Default for ReminderTemplates {
    fn default() -> Self {
        Self {
            one_week: default_one_week_template(),
            one_day: default_one_day_template(),
            one_hour: default_one_hour_template(),
            immediate: default_immediate_template(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long a due reminder waits for the session to come back before it is dropped.
    #[serde(default = "default_ready_grace", rename = "readyGraceSecs")]
    pub ready_grace_secs: u64,
    /// Requested pacing between reminder sends; raised to the tenant's minimum delay.
    #[serde(default = "default_bulk_delay", rename = "bulkDelaySecs")]
    pub bulk_delay_secs: u64,
    #[serde(default)]
    pub templates: ReminderTemplates,
}

fn default_ready_grace() -> u64 {
    3600
}

fn default_bulk_delay() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ready_grace_secs: default_ready_grace(),
            bulk_delay_secs: default_bulk_delay(),
            templates: ReminderTemplates::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn ready_grace(&self) -> Duration {
        Duration::from_secs(self.ready_grace_secs)
    }

    pub fn bulk_delay(&self) -> Duration {
        Duration::from_secs(self.bulk_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_base_delay", rename = "baseDelaySecs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay", rename = "maxDelaySecs")]
    pub max_delay_secs: u64,
}

fn default_base_delay() -> u64 {
    5
}

fn default_max_delay() -> u64 {
    60
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_per_hour", rename = "maxPerHour")]
    pub max_per_hour: u32,
    #[serde(default = "default_max_per_day", rename = "maxPerDay")]
    pub max_per_day: u32,
    #[serde(default = "default_min_delay", rename = "minDelaySecs")]
    pub min_delay_secs: u64,
}

fn default_max_per_hour() -> u32 {
    60
}

fn default_max_per_day() -> u32 {
    200
}

fn default_min_delay() -> u64 {
    30
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_per_hour: default_max_per_hour(),
            max_per_day: default_max_per_day(),
            min_delay_secs: default_min_delay(),
        }
    }
}

impl LimitsConfig {
    /// Effective limits after clamping to the platform caps.
    pub fn to_limits(&self) -> RateLimits {
        RateLimits::clamped(
            self.max_per_day,
            self.max_per_hour,
            Duration::from_secs(self.min_delay_secs),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: String,
    #[serde(default = "default_country_code", rename = "countryCode")]
    pub country_code: String,
    #[serde(default)]
    pub limits: LimitsConfig,
    pub transport: TransportConfig,
}

fn default_country_code() -> String {
    DEFAULT_COUNTRY_CODE.to_string()
}

impl TenantConfig {
    pub fn simulated(id: &str) -> Self {
        Self {
            id: id.to_string(),
            country_code: default_country_code(),
            limits: LimitsConfig::default(),
            transport: TransportConfig::Simulated(SimulatedConfig::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

impl Config {
    pub fn tenant(&self, id: &str) -> Option<&TenantConfig> {
        self.tenants.iter().find(|t| t.id == id)
    }

    pub fn validate(&self) -> Result<(), CourierError> {
        self.validate_session()?;
        self.validate_dispatch()?;
        self.validate_supervisor()?;
        self.validate_tenants()?;
        Ok(())
    }

    fn validate_session(&self) -> Result<(), CourierError> {
        let s = &self.session;
        if s.handshake_timeout_secs == 0 {
            return Err(CourierError::Config(
                "session.handshakeTimeoutSecs must be > 0".into(),
            ));
        }
        if s.auth_artifact_timeout_secs == 0 {
            return Err(CourierError::Config(
                "session.authArtifactTimeoutSecs must be > 0".into(),
            ));
        }
        if s.ready_timeout_secs == 0 {
            return Err(CourierError::Config(
                "session.readyTimeoutSecs must be > 0".into(),
            ));
        }
        Ok(())
    }

    fn validate_dispatch(&self) -> Result<(), CourierError> {
        let d = &self.dispatch;
        if d.send_timeout_secs == 0 {
            return Err(CourierError::Config(
                "dispatch.sendTimeoutSecs must be > 0".into(),
            ));
        }
        if d.queue_capacity == 0 {
            return Err(CourierError::Config(
                "dispatch.queueCapacity must be > 0".into(),
            ));
        }
        if d.dedupe_capacity == 0 {
            return Err(CourierError::Config(
                "dispatch.dedupeCapacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    fn validate_supervisor(&self) -> Result<(), CourierError> {
        let s = &self.supervisor;
        if s.base_delay_secs == 0 {
            return Err(CourierError::Config(
                "supervisor.baseDelaySecs must be > 0".into(),
            ));
        }
        if s.max_delay_secs < s.base_delay_secs {
            return Err(CourierError::Config(
                "supervisor.maxDelaySecs must be >= supervisor.baseDelaySecs".into(),
            ));
        }
        Ok(())
    }

    fn validate_tenants(&self) -> Result<(), CourierError> {
        let mut seen = HashSet::new();
        for tenant in &self.tenants {
            if tenant.id.is_empty()
                || !tenant
                    .id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(CourierError::Config(format!(
                    "tenant id {:?} must be non-empty and contain only letters, digits, '-' or '_'",
                    tenant.id
                )));
            }
            if !seen.insert(tenant.id.as_str()) {
                return Err(CourierError::Config(format!(
                    "duplicate tenant id {:?}",
                    tenant.id
                )));
            }
            PhoneNormalizer::new(&tenant.country_code).map_err(|_| {
                CourierError::Config(format!(
                    "tenants.{}.countryCode {:?} must have 1 to 3 digits",
                    tenant.id, tenant.country_code
                ))
            })?;
            if tenant.limits.max_per_hour == 0 || tenant.limits.max_per_day == 0 {
                return Err(CourierError::Config(format!(
                    "tenants.{}.limits: maxPerHour and maxPerDay must be > 0",
                    tenant.id
                )));
            }
            tenant.transport.validate(&tenant.id)?;
        }
        Ok(())
    }
}
