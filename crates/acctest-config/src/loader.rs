use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigError;
use crate::raw::RawHarnessConfig;
use crate::settings::{
    AzureSettings, EngineKind, HarnessConfig, RunSettings, TerraformSettings,
    DEFAULT_MANAGEMENT_ENDPOINT,
};

/// Load the harness configuration from `path` (or defaults when `None`)
/// and apply overrides from the process environment.
pub fn load_config(path: Option<&Path>) -> Result<HarnessConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Like [`load_config`] but reads environment overrides through `env`.
///
/// Recognised variables: `ACCTEST_ENGINE`, `ARM_SUBSCRIPTION_ID`,
/// `ARM_TENANT_ID`, `ARM_CLIENT_ID`, `ARM_CLIENT_SECRET`,
/// `ARM_TEST_LOCATION`, `ARM_TEST_LOCATION_ALT`, `ARM_PROVIDER_STRICT`,
/// `TF_ACC`. Empty values count as unset.
pub fn load_config_with_env<F>(path: Option<&Path>, env: F) -> Result<HarnessConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

    let (raw, origin) = match path {
        Some(p) => (read_raw(p)?, p.display().to_string()),
        None => (RawHarnessConfig::default(), "<defaults>".to_string()),
    };

    let mut config = convert(raw, &origin, env("HOME"))?;

    if let Some(engine) = env("ACCTEST_ENGINE") {
        config.engine = parse_engine(&engine, "ACCTEST_ENGINE")?;
    }
    if let Some(v) = env("ARM_SUBSCRIPTION_ID") {
        config.azure.subscription_id = Some(v);
    }
    if let Some(v) = env("ARM_TENANT_ID") {
        config.azure.tenant_id = Some(v);
    }
    if let Some(v) = env("ARM_CLIENT_ID") {
        config.azure.client_id = Some(v);
    }
    if let Some(v) = env("ARM_CLIENT_SECRET") {
        config.azure.client_secret = Some(v);
    }
    if let Some(v) = env("ARM_TEST_LOCATION") {
        config.primary_location = Some(v);
    }
    if let Some(v) = env("ARM_TEST_LOCATION_ALT") {
        config.secondary_location = Some(v);
    }
    if let Some(v) = env("ARM_PROVIDER_STRICT") {
        config.run.require_imports = parse_bool(&v, "ARM_PROVIDER_STRICT")?;
    }
    config.acceptance = env("TF_ACC").is_some();

    debug!(engine = %config.engine, origin = %origin, "harness configuration loaded");
    Ok(config)
}

fn read_raw(path: &Path) -> Result<RawHarnessConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })
}

fn convert(
    raw: RawHarnessConfig,
    origin: &str,
    home: Option<String>,
) -> Result<HarnessConfig, ConfigError> {
    let engine = match raw.engine.as_deref() {
        Some(s) => parse_engine(s, origin)?,
        None => EngineKind::Local,
    };

    let locations = raw.locations.unwrap_or_default();
    let azure = raw.azure.unwrap_or_default();
    let terraform = raw.terraform.unwrap_or_default();
    let run = raw.run.unwrap_or_default();
    let defaults = RunSettings::default();

    let parallelism = run.parallelism.unwrap_or(defaults.parallelism);
    if parallelism == 0 {
        return Err(ConfigError::Conversion {
            path: origin.to_string(),
            message: "run.parallelism must be at least 1".into(),
        });
    }

    let workspace_root = match terraform.workspace_root {
        Some(p) => PathBuf::from(p),
        None => PathBuf::from(home.unwrap_or_else(|| ".".into()))
            .join(".acctest")
            .join("workspaces"),
    };

    Ok(HarnessConfig {
        engine,
        primary_location: locations.primary,
        secondary_location: locations.secondary,
        azure: AzureSettings {
            subscription_id: azure.subscription_id,
            tenant_id: azure.tenant_id,
            client_id: azure.client_id,
            client_secret: azure.client_secret,
            management_endpoint: azure
                .management_endpoint
                .unwrap_or_else(|| DEFAULT_MANAGEMENT_ENDPOINT.into()),
        },
        terraform: TerraformSettings {
            binary: terraform.binary.unwrap_or_else(|| "terraform".into()),
            workspace_root,
        },
        run: RunSettings {
            parallelism,
            scenario_timeout: run
                .scenario_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.scenario_timeout),
            teardown_timeout: run
                .teardown_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.teardown_timeout),
            require_imports: run.require_imports.unwrap_or(defaults.require_imports),
        },
        acceptance: false,
    })
}

fn parse_engine(s: &str, origin: &str) -> Result<EngineKind, ConfigError> {
    match s {
        "local" => Ok(EngineKind::Local),
        "terraform" => Ok(EngineKind::Terraform),
        other => Err(ConfigError::Conversion {
            path: origin.to_string(),
            message: format!("unknown engine '{}'", other),
        }),
    }
}

fn parse_bool(s: &str, origin: &str) -> Result<bool, ConfigError> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::Conversion {
            path: origin.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let cfg = load_config_with_env(None, env_of(&[("HOME", "/home/ci")])).unwrap();
        assert_eq!(cfg.engine, EngineKind::Local);
        assert_eq!(cfg.primary_location(), "westeurope");
        assert_eq!(cfg.terraform.binary, "terraform");
        assert_eq!(
            cfg.terraform.workspace_root,
            PathBuf::from("/home/ci/.acctest/workspaces")
        );
        assert!(cfg.should_resources_be_imported());
        assert!(!cfg.acceptance);
        assert!(cfg.pre_check().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = load_config_with_env(
            None,
            env_of(&[
                ("ACCTEST_ENGINE", "terraform"),
                ("ARM_SUBSCRIPTION_ID", "sub"),
                ("ARM_TENANT_ID", "tenant"),
                ("ARM_TEST_LOCATION", "eastus2"),
                ("ARM_TEST_LOCATION_ALT", "westus2"),
                ("ARM_PROVIDER_STRICT", "false"),
                ("TF_ACC", "1"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.engine, EngineKind::Terraform);
        assert_eq!(cfg.primary_location(), "eastus2");
        assert!(!cfg.should_resources_be_imported());
        assert!(cfg.pre_check().is_ok());
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let cfg = load_config_with_env(None, env_of(&[("ARM_TEST_LOCATION", "  "), ("TF_ACC", "")])).unwrap();
        assert!(cfg.primary_location.is_none());
        assert!(!cfg.acceptance);
    }

    #[test]
    fn terraform_pre_check_lists_missing_settings() {
        let cfg = load_config_with_env(
            None,
            env_of(&[("ACCTEST_ENGINE", "terraform"), ("TF_ACC", "1"), ("ARM_CLIENT_ID", "x")]),
        )
        .unwrap();
        let err = cfg.pre_check().unwrap_err().to_string();
        for key in [
            "ARM_SUBSCRIPTION_ID",
            "ARM_TENANT_ID",
            "ARM_TEST_LOCATION",
            "ARM_TEST_LOCATION_ALT",
            "ARM_CLIENT_SECRET",
        ] {
            assert!(err.contains(key), "{} missing from: {}", key, err);
        }
    }

    #[test]
    fn terraform_requires_tf_acc() {
        let cfg = load_config_with_env(None, env_of(&[("ACCTEST_ENGINE", "terraform")])).unwrap();
        assert!(matches!(
            cfg.pre_check(),
            Err(ConfigError::AcceptanceDisabled { .. })
        ));
    }

    #[test]
    fn bad_engine_and_bool_are_rejected() {
        assert!(load_config_with_env(None, env_of(&[("ACCTEST_ENGINE", "pulumi")])).is_err());
        assert!(load_config_with_env(None, env_of(&[("ARM_PROVIDER_STRICT", "maybe")])).is_err());
    }
}
