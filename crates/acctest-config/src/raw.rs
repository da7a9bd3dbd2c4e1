use serde::{Deserialize, Serialize};

/// Raw YAML representation of `acctest.yml`.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawHarnessConfig {
    /// "local" (default) or "terraform".
    pub engine: Option<String>,
    pub locations: Option<RawLocations>,
    pub azure: Option<RawAzure>,
    pub terraform: Option<RawTerraform>,
    pub run: Option<RawRun>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawLocations {
    pub primary: Option<String>,
    pub secondary: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawAzure {
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    /// Service principal client ID (optional; falls back to MSI/CLI).
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Override of the ARM endpoint, e.g. for sovereign clouds.
    pub management_endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawTerraform {
    /// Override the IaC binary. Absent = `terraform`.
    pub binary: Option<String>,
    /// Directory under which per-scenario workspaces are created.
    pub workspace_root: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawRun {
    pub parallelism: Option<usize>,
    pub scenario_timeout_secs: Option<u64>,
    pub teardown_timeout_secs: Option<u64>,
    /// Whether the requires-import scenarios run at all.
    pub require_imports: Option<bool>,
}
