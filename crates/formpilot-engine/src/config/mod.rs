pub mod loader;
pub mod schema;

pub use loader::{CONFIG_PATH_ENV, ConfigError, ConfigLoader, missing_required_keys};
pub use schema::{
    EngineSettings, EventConfig, FormLayout, LaunchSettings, REQUIRED_KEYS, RecoverySettings,
    RetrySettings, TimeoutSettings,
};
