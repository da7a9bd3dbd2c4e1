use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_PRIMARY_LOCATION: &str = "westeurope";
pub const DEFAULT_SECONDARY_LOCATION: &str = "northeurope";
pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// In-process simulation backed by an in-memory system of record.
    Local,
    /// Real `terraform` runs against Azure.
    Terraform,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Local => write!(f, "local"),
            EngineKind::Terraform => write!(f, "terraform"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AzureSettings {
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub management_endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerraformSettings {
    pub binary: String,
    pub workspace_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub parallelism: usize,
    pub scenario_timeout: Duration,
    pub teardown_timeout: Duration,
    pub require_imports: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            parallelism: 4,
            scenario_timeout: Duration::from_secs(3 * 3600),
            teardown_timeout: Duration::from_secs(3600),
            require_imports: true,
        }
    }
}

/// Validated harness configuration (file values with environment overrides applied).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub engine: EngineKind,
    pub primary_location: Option<String>,
    pub secondary_location: Option<String>,
    pub azure: AzureSettings,
    pub terraform: TerraformSettings,
    pub run: RunSettings,
    /// `TF_ACC` was set; real-cloud runs are only allowed when it is.
    pub acceptance: bool,
}

impl HarnessConfig {
    pub fn primary_location(&self) -> &str {
        self.primary_location.as_deref().unwrap_or(DEFAULT_PRIMARY_LOCATION)
    }

    pub fn secondary_location(&self) -> &str {
        self.secondary_location.as_deref().unwrap_or(DEFAULT_SECONDARY_LOCATION)
    }

    pub fn should_resources_be_imported(&self) -> bool {
        self.run.require_imports
    }

    /// Refuse to start a run the selected engine cannot complete.
    ///
    /// The local engine needs nothing. The terraform engine needs `TF_ACC`,
    /// a subscription, a tenant and both test locations.
    pub fn pre_check(&self) -> Result<(), ConfigError> {
        if self.engine == EngineKind::Local {
            return Ok(());
        }

        if !self.acceptance {
            return Err(ConfigError::AcceptanceDisabled {
                engine: self.engine.to_string(),
            });
        }

        let mut missing = Vec::new();
        if self.azure.subscription_id.is_none() {
            missing.push("ARM_SUBSCRIPTION_ID".to_string());
        }
        if self.azure.tenant_id.is_none() {
            missing.push("ARM_TENANT_ID".to_string());
        }
        if self.primary_location.is_none() {
            missing.push("ARM_TEST_LOCATION".to_string());
        }
        if self.secondary_location.is_none() {
            missing.push("ARM_TEST_LOCATION_ALT".to_string());
        }
        if self.azure.client_id.is_some() != self.azure.client_secret.is_some() {
            missing.push(if self.azure.client_id.is_some() {
                "ARM_CLIENT_SECRET".to_string()
            } else {
                "ARM_CLIENT_ID".to_string()
            });
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingSettings {
                engine: self.engine.to_string(),
                settings: missing,
            })
        }
    }
}
