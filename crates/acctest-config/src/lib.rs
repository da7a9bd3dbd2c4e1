mod raw;
mod loader;
pub mod error;
pub mod settings;

pub use error::ConfigError;
pub use loader::{load_config, load_config_with_env};
pub use settings::{AzureSettings, EngineKind, HarnessConfig, RunSettings, TerraformSettings};
