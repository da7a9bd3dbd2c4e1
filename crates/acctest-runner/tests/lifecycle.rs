use std::sync::Arc;
use std::time::Duration;

use acctest_domain::{ResourceReference, StateSnapshot};
use acctest_driver::{
    ApplyEngine, ApplyError, DriverRegistry, EngineFactory, InMemoryRecords, LocalEngine,
    LocalEngineFactory, MemoryDriver, PlanSummary,
};
use acctest_fixture::{Fixture, Locations, TestData};
use acctest_runner::{
    catalog, find, Check, LifecycleState, Runner, RunnerSettings, Scenario, ScenarioError,
    ScenarioOutcome, StepOutcome, TestStep,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;

fn registry(records: &InMemoryRecords) -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry
        .register(Arc::new(MemoryDriver::key_vault_secrets(records.clone())))
        .register(Arc::new(MemoryDriver::storage_shares(records.clone())));
    registry
}

fn settings() -> RunnerSettings {
    RunnerSettings {
        parallelism: 3,
        scenario_timeout: Duration::from_secs(60),
        teardown_timeout: Duration::from_secs(30),
        require_imports: true,
        locations: Locations::new("westeurope", "northeurope"),
    }
}

fn local_runner(settings: RunnerSettings) -> (Runner, InMemoryRecords) {
    let factory = LocalEngineFactory::default();
    let records = factory.records().clone();
    (Runner::new(registry(&records), Arc::new(factory), settings), records)
}

fn data(resource_type: &str) -> TestData {
    TestData::new(resource_type, "test", 4242, "abcde", Locations::new("westeurope", "northeurope"))
}

fn one(name: &str) -> Scenario {
    let found = find(name);
    assert_eq!(found.len(), 1, "{}", name);
    found[0]
}

#[tokio::test]
async fn whole_catalog_passes_and_cleans_up() {
    let (runner, records) = local_runner(settings());
    let scenarios = catalog();

    let report = runner.run_scenarios(&scenarios).await;

    for s in &report.scenarios {
        assert!(
            s.passed() && s.teardown.is_none(),
            "{}/{}: {:?} teardown={:?}",
            s.resource_type,
            s.name,
            s.outcome,
            s.teardown
        );
        assert_eq!(s.last_state(), LifecycleState::Destroyed, "{}", s.name);
    }
    assert_eq!(report.scenarios.len(), scenarios.len());
    assert_eq!(report.engine, "local");
    assert!(report.is_success());
    assert!(records.is_empty().await, "left behind: {:?}", records.all().await);
}

#[tokio::test]
async fn disappears_walks_through_drift() {
    let (runner, _records) = local_runner(settings());
    let report = runner
        .run_scenario(&one("storage_share/disappears"), data("azurerm_storage_share"))
        .await;

    assert!(report.passed(), "{:?}", report.outcome);
    assert_eq!(
        report.transitions,
        vec![
            LifecycleState::Init,
            LifecycleState::Applied,
            LifecycleState::DisappearedExternally,
            LifecycleState::PlanDiverged,
            LifecycleState::Destroyed,
        ]
    );
    assert!(matches!(report.steps[0].outcome, StepOutcome::Drifted { plan } if plan.add == 1));
}

#[tokio::test]
async fn update_records_transitions() {
    let (runner, _records) = local_runner(settings());
    let report = runner
        .run_scenario(&one("key_vault_secret/update"), data("azurerm_key_vault_secret"))
        .await;

    assert!(report.passed(), "{:?}", report.outcome);
    assert_eq!(
        report.transitions,
        vec![
            LifecycleState::Init,
            LifecycleState::Applied,
            LifecycleState::Asserted,
            LifecycleState::Updated,
            LifecycleState::Asserted,
            LifecycleState::Destroyed,
        ]
    );
}

#[tokio::test]
async fn requires_import_is_skipped_when_not_required() {
    let (runner, _records) = local_runner(RunnerSettings {
        require_imports: false,
        ..settings()
    });
    let report = runner.run_scenarios(&find("requires_import")).await;

    assert_eq!(report.skipped(), 2);
    assert!(report.is_success());
}

#[tokio::test]
async fn failed_check_still_tears_down() {
    let (runner, records) = local_runner(settings());
    let scenario = Scenario {
        name: "wrong_value",
        resource_type: "azurerm_key_vault_secret",
        requires_import_feature: false,
        build: |data| {
            vec![TestStep::apply(acctest_fixture::generate(
                acctest_fixture::TemplateId::KeyVaultSecretBasic,
                data,
            ))
            .check(Check::attr(&data.resource_name(), "value", "szechuan"))]
        },
    };

    let report = runner.run_scenario(&scenario, data("azurerm_key_vault_secret")).await;

    match &report.outcome {
        ScenarioOutcome::Failed(ScenarioError::Assertion { address, message }) => {
            assert_eq!(address, "azurerm_key_vault_secret.test");
            assert!(message.contains("szechuan"), "{}", message);
        }
        other => panic!("expected an assertion failure, got {:?}", other),
    }
    assert_eq!(report.last_state(), LifecycleState::Failed);
    assert!(report.teardown.is_none());
    assert!(records.is_empty().await);
}

#[tokio::test]
async fn timeout_fails_scenario() {
    let (runner, _records) = local_runner(RunnerSettings {
        scenario_timeout: Duration::ZERO,
        ..settings()
    });
    let report = runner
        .run_scenario(&one("storage_share/basic"), data("azurerm_storage_share"))
        .await;

    assert!(
        matches!(report.outcome, ScenarioOutcome::Failed(ScenarioError::Timeout { .. })),
        "{:?}",
        report.outcome
    );
}

/// Local engine with knobs for misbehaving.
struct Faulty {
    inner: LocalEngine,
    phantom_diff: bool,
    skip_destroy: bool,
}

#[async_trait]
impl ApplyEngine for Faulty {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn apply(&self, fixture: &Fixture) -> Result<StateSnapshot, ApplyError> {
        self.inner.apply(fixture).await
    }

    async fn plan(&self, fixture: &Fixture) -> Result<PlanSummary, ApplyError> {
        if self.phantom_diff {
            return Ok(PlanSummary { change: 1, ..Default::default() });
        }
        self.inner.plan(fixture).await
    }

    async fn import(&self, address: &str, id: &str, fixture: &Fixture) -> Result<ResourceReference, ApplyError> {
        self.inner.import(address, id, fixture).await
    }

    async fn destroy(&self, fixture: &Fixture) -> Result<(), ApplyError> {
        if self.skip_destroy {
            return Ok(());
        }
        self.inner.destroy(fixture).await
    }

    async fn state(&self) -> StateSnapshot {
        self.inner.state().await
    }
}

struct FaultyFactory {
    records: InMemoryRecords,
    phantom_diff: bool,
    skip_destroy: bool,
}

impl EngineFactory for FaultyFactory {
    fn name(&self) -> &'static str {
        "faulty"
    }

    fn create(&self, _scenario: &str) -> Result<Arc<dyn ApplyEngine>, ApplyError> {
        Ok(Arc::new(Faulty {
            inner: LocalEngine::new(self.records.clone()),
            phantom_diff: self.phantom_diff,
            skip_destroy: self.skip_destroy,
        }))
    }
}

fn faulty_runner(phantom_diff: bool, skip_destroy: bool) -> (Runner, InMemoryRecords) {
    let records = InMemoryRecords::new();
    let factory = FaultyFactory {
        records: records.clone(),
        phantom_diff,
        skip_destroy,
    };
    (Runner::new(registry(&records), Arc::new(factory), settings()), records)
}

#[tokio::test]
async fn non_empty_plan_after_apply_is_a_failure() {
    let (runner, records) = faulty_runner(true, false);
    let report = runner
        .run_scenario(&one("storage_share/basic"), data("azurerm_storage_share"))
        .await;

    match &report.outcome {
        ScenarioOutcome::Failed(ScenarioError::UnexpectedDiff { step, plan }) => {
            assert_eq!(*step, 0);
            assert_eq!(plan.change, 1);
        }
        other => panic!("expected UnexpectedDiff, got {:?}", other),
    }
    assert!(records.is_empty().await);
}

#[tokio::test]
async fn leftover_resource_fails_passing_scenario() {
    let (runner, records) = faulty_runner(false, true);
    let report = runner
        .run_scenario(&one("storage_share/basic"), data("azurerm_storage_share"))
        .await;

    match &report.outcome {
        ScenarioOutcome::Failed(ScenarioError::StillExists { address, observed, .. }) => {
            assert_eq!(address, "azurerm_storage_share.test");
            assert!(observed.contains("testshareabcde"), "{}", observed);
        }
        other => panic!("expected StillExists, got {:?}", other),
    }
    assert!(report.teardown.is_none());
    assert!(!records.is_empty().await);
}

#[tokio::test]
async fn panicking_scenario_is_reported_as_failed() {
    let (runner, records) = local_runner(settings());
    let broken = Scenario {
        name: "broken_builder",
        resource_type: "azurerm_storage_share",
        requires_import_feature: false,
        build: |_| panic!("builder exploded"),
    };

    let report = runner
        .run_scenarios(&[broken, one("storage_share/basic")])
        .await;

    assert_eq!(report.scenarios.len(), 2);
    let first = &report.scenarios[0];
    assert_eq!(first.name, "broken_builder");
    match &first.outcome {
        ScenarioOutcome::Failed(ScenarioError::Aborted { scenario, message }) => {
            assert_eq!(scenario, "broken_builder");
            assert!(message.contains("builder exploded"), "{}", message);
        }
        other => panic!("expected Aborted, got {:?}", other),
    }
    assert_eq!(first.last_state(), LifecycleState::Failed);
    assert!(report.scenarios[1].passed(), "{:?}", report.scenarios[1].outcome);
    assert_eq!(report.failed(), 1);
    assert!(!report.is_success());
    assert!(records.is_empty().await);
}

#[tokio::test]
async fn expected_diff_that_never_shows_up_is_tolerated() {
    let (runner, records) = local_runner(settings());
    let scenario = Scenario {
        name: "quiet_plan",
        resource_type: "azurerm_storage_share",
        requires_import_feature: false,
        build: |data| {
            vec![TestStep::apply(acctest_fixture::generate(
                acctest_fixture::TemplateId::StorageShareBasic,
                data,
            ))
            .check(Check::exists(&data.resource_name()))
            .expect_non_empty_plan()]
        },
    };

    let report = runner.run_scenario(&scenario, data("azurerm_storage_share")).await;

    assert!(report.passed(), "{:?}", report.outcome);
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].outcome, StepOutcome::Applied);
    assert!(!report.transitions.contains(&LifecycleState::PlanDiverged));
    assert_eq!(report.last_state(), LifecycleState::Destroyed);
    assert!(records.is_empty().await);
}
