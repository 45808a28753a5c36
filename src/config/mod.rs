pub mod loader;
pub mod schema;

pub use loader::{bridge_api_key_env, get_config_path, load_config, save_config};
pub use schema::{
    BridgeConfig, Config, DispatchConfig, LimitsConfig, ReminderTemplates, SchedulerConfig,
    SessionConfig, SimulatedConfig, SupervisorConfig, TenantConfig, TransportConfig,
};
