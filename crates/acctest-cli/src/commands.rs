use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use acctest_config::{load_config, EngineKind, HarnessConfig};
use acctest_driver::{
    ArmClient, AzureCredentials, DriverRegistry, KeyVaultSecretDriver, LocalEngineFactory,
    MemoryDriver, StorageShareDriver, TerraformEngineFactory, TokenProvider,
};
use acctest_fixture::{generate, Locations, TemplateId, TestData};
use acctest_runner::{catalog, find, Runner, RunnerSettings, Scenario, RESOURCE_LABEL};
use tracing::info;
use uuid::Uuid;

use crate::cli::{EngineArg, OutputFormat};
use crate::output;

// ── List ──────────────────────────────────────────────────────────────────────

pub fn list() -> Result<()> {
    print!("{}", output::render_catalog(&catalog()));
    Ok(())
}

// ── Render ────────────────────────────────────────────────────────────────────

pub fn render(
    template: TemplateId,
    random_integer: Option<i64>,
    random_string: Option<String>,
    location: String,
    seed: Option<Uuid>,
) -> Result<()> {
    let locations = Locations::new(location.clone(), location);
    let mut data = TestData::seeded(
        template.resource_type(),
        RESOURCE_LABEL,
        seed.unwrap_or_else(Uuid::new_v4),
        locations,
    );
    if let Some(n) = random_integer {
        data.random_integer = n;
    }
    if let Some(s) = random_string {
        data.random_string = s;
    }
    print!("{}", generate(template, &data).text());
    Ok(())
}

// ── Run ───────────────────────────────────────────────────────────────────────

pub async fn run(
    names: Vec<String>,
    engine: Option<EngineArg>,
    config_path: Option<PathBuf>,
    parallel: Option<usize>,
    timeout: Option<u64>,
    output_format: OutputFormat,
) -> Result<bool> {
    let mut config = load_config(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(engine) = engine {
        config.engine = match engine {
            EngineArg::Local => EngineKind::Local,
            EngineArg::Terraform => EngineKind::Terraform,
        };
    }
    if let Some(n) = parallel {
        config.run.parallelism = n.max(1);
    }
    if let Some(secs) = timeout {
        config.run.scenario_timeout = Duration::from_secs(secs);
    }
    config.pre_check().context("Pre-check failed")?;

    let scenarios = select(&names)?;
    let settings = RunnerSettings::from(&config);
    let runner = match config.engine {
        EngineKind::Local => local_runner(settings),
        EngineKind::Terraform => terraform_runner(&config, settings)?,
    };

    info!(engine = %config.engine, scenarios = scenarios.len(), "starting run");
    let report = runner.run_scenarios(&scenarios).await;

    match output_format {
        OutputFormat::Text => print!("{}", output::render_report(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(report.is_success())
}

fn select(names: &[String]) -> Result<Vec<Scenario>> {
    if names.is_empty() {
        return Ok(catalog());
    }
    let mut selected = Vec::new();
    for name in names {
        let found = find(name);
        if found.is_empty() {
            anyhow::bail!("Unknown scenario '{}'; see `acctest list`", name);
        }
        selected.extend(found);
    }
    Ok(selected)
}

fn local_runner(settings: RunnerSettings) -> Runner {
    let factory = LocalEngineFactory::default();
    let records = factory.records().clone();

    let mut registry = DriverRegistry::new();
    registry
        .register(Arc::new(MemoryDriver::key_vault_secrets(records.clone())))
        .register(Arc::new(MemoryDriver::storage_shares(records)));
    Runner::new(registry, Arc::new(factory), settings)
}

fn terraform_runner(config: &HarnessConfig, settings: RunnerSettings) -> Result<Runner> {
    let azure = &config.azure;
    let subscription_id = azure
        .subscription_id
        .clone()
        .context("ARM_SUBSCRIPTION_ID is required for the terraform engine")?;

    let credentials = AzureCredentials {
        tenant_id: azure.tenant_id.clone(),
        client_id: azure.client_id.clone(),
        client_secret: azure.client_secret.clone(),
        login_endpoint: None,
    };
    let token: Arc<dyn TokenProvider> = Arc::from(credentials.into_provider());
    let arm = ArmClient::new(&azure.management_endpoint, subscription_id.clone(), token);

    let mut registry = DriverRegistry::new();
    registry
        .register(Arc::new(KeyVaultSecretDriver::new(arm.clone())))
        .register(Arc::new(StorageShareDriver::new(arm)));

    let mut env = HashMap::from([("ARM_SUBSCRIPTION_ID".to_string(), subscription_id)]);
    for (key, value) in [
        ("ARM_TENANT_ID", &azure.tenant_id),
        ("ARM_CLIENT_ID", &azure.client_id),
        ("ARM_CLIENT_SECRET", &azure.client_secret),
    ] {
        if let Some(v) = value {
            env.insert(key.to_string(), v.clone());
        }
    }

    let factory = TerraformEngineFactory::new(
        config.terraform.binary.clone(),
        config.terraform.workspace_root.clone(),
        env,
    );
    Ok(Runner::new(registry, Arc::new(factory), settings))
}
