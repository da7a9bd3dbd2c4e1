use std::io::Write;
use std::time::Duration;

use acctest_config::{load_config_with_env, ConfigError, EngineKind};

fn no_env(_: &str) -> Option<String> {
    None
}

fn write_yaml(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    file.write_all(content.as_bytes()).expect("write yaml");
    file
}

#[test]
fn load_full_file() {
    let file = write_yaml(
        r#"
engine: terraform
locations:
  primary: westus2
  secondary: eastus
azure:
  subscription_id: 00000000-0000-0000-0000-000000000001
  tenant_id: 00000000-0000-0000-0000-000000000002
terraform:
  binary: tofu
  workspace_root: /tmp/acctest-ws
run:
  parallelism: 2
  scenario_timeout_secs: 600
  require_imports: false
"#,
    );

    let cfg = load_config_with_env(Some(file.path()), no_env).expect("should load");
    assert_eq!(cfg.engine, EngineKind::Terraform);
    assert_eq!(cfg.primary_location(), "westus2");
    assert_eq!(cfg.secondary_location(), "eastus");
    assert_eq!(cfg.terraform.binary, "tofu");
    assert_eq!(cfg.terraform.workspace_root.to_str(), Some("/tmp/acctest-ws"));
    assert_eq!(cfg.run.parallelism, 2);
    assert_eq!(cfg.run.scenario_timeout, Duration::from_secs(600));
    assert_eq!(cfg.run.teardown_timeout, Duration::from_secs(3600));
    assert!(!cfg.should_resources_be_imported());
    assert_eq!(cfg.azure.management_endpoint, "https://management.azure.com");
}

#[test]
fn environment_wins_over_file() {
    let file = write_yaml("locations:\n  primary: westus2\n");
    let cfg = load_config_with_env(Some(file.path()), |k| match k {
        "ARM_TEST_LOCATION" => Some("uksouth".to_string()),
        _ => None,
    })
    .expect("should load");
    assert_eq!(cfg.primary_location(), "uksouth");
}

#[test]
fn unknown_field_is_a_parse_error() {
    let file = write_yaml("enigne: local\n");
    let err = load_config_with_env(Some(file.path()), no_env).unwrap_err();
    assert!(matches!(err, ConfigError::YamlParse { .. }), "got: {}", err);
}

#[test]
fn unknown_engine_is_a_conversion_error() {
    let file = write_yaml("engine: pulumi\n");
    let err = load_config_with_env(Some(file.path()), no_env).unwrap_err();
    assert!(matches!(err, ConfigError::Conversion { .. }), "got: {}", err);
    assert!(err.to_string().contains("pulumi"));
}

#[test]
fn zero_parallelism_is_rejected() {
    let file = write_yaml("run:\n  parallelism: 0\n");
    assert!(load_config_with_env(Some(file.path()), no_env).is_err());
}

#[test]
fn missing_file_returns_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = load_config_with_env(Some(&dir.path().join("absent.yml")), no_env).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "got: {}", err);
}
