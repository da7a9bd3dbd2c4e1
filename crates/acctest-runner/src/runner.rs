use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use acctest_config::{HarnessConfig, RunSettings};
use acctest_domain::StateSnapshot;
use acctest_driver::{ApplyEngine, DriverRegistry, EngineFactory};
use acctest_fixture::{Fixture, Locations, TestData};
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::checks::{evaluate, run_destroy_check, run_import_conflict_check, run_import_verify, CheckEffect};
use crate::error::ScenarioError;
use crate::report::{LifecycleState, RunReport, ScenarioOutcome, ScenarioReport, StepOutcome, StepReport};
use crate::scenario::{Scenario, ScenarioContext, StepKind, TestStep};

/// Logical name every catalog scenario gives its resource under test.
pub const RESOURCE_LABEL: &str = "test";

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub parallelism: usize,
    pub scenario_timeout: Duration,
    pub teardown_timeout: Duration,
    pub require_imports: bool,
    pub locations: Locations,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        let run = RunSettings::default();
        Self {
            parallelism: run.parallelism,
            scenario_timeout: run.scenario_timeout,
            teardown_timeout: run.teardown_timeout,
            require_imports: run.require_imports,
            locations: Locations::new("westeurope", "northeurope"),
        }
    }
}

impl From<&HarnessConfig> for RunnerSettings {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            parallelism: config.run.parallelism,
            scenario_timeout: config.run.scenario_timeout,
            teardown_timeout: config.run.teardown_timeout,
            require_imports: config.should_resources_be_imported(),
            locations: Locations::new(config.primary_location(), config.secondary_location()),
        }
    }
}

/// What the step loop leaves behind for teardown.
#[derive(Default)]
struct Progress {
    fixture: Option<Fixture>,
    applied: bool,
}

/// Drives scenarios through apply, checks, plan and teardown.
#[derive(Clone)]
pub struct Runner {
    registry: Arc<DriverRegistry>,
    engines: Arc<dyn EngineFactory>,
    settings: RunnerSettings,
}

impl Runner {
    pub fn new(registry: DriverRegistry, engines: Arc<dyn EngineFactory>, settings: RunnerSettings) -> Self {
        Self {
            registry: Arc::new(registry),
            engines,
            settings,
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Run one scenario to completion. Never panics on scenario failure;
    /// everything ends up in the report.
    pub async fn run_scenario(&self, scenario: &Scenario, data: TestData) -> ScenarioReport {
        if scenario.requires_import_feature && !self.settings.require_imports {
            info!(scenario = scenario.name, "skipped: resources are not required to be imported");
            return ScenarioReport::skipped(
                scenario.name,
                scenario.resource_type,
                "resources are not required to be imported",
            );
        }

        let mut report = ScenarioReport::new(scenario.name, scenario.resource_type);
        info!(
            scenario = scenario.name,
            resource = %data.resource_name(),
            run_id = %report.run_id,
            "scenario starting"
        );

        let engine = match self.engines.create(scenario.name) {
            Ok(engine) => engine,
            Err(source) => {
                report.outcome = ScenarioOutcome::Failed(ScenarioError::Apply { step: 0, source });
                report.enter(LifecycleState::Failed);
                report.finished_at = Utc::now();
                return report;
            }
        };

        let ctx = ScenarioContext::new(scenario.name, data.clone(), self.settings.scenario_timeout);
        let steps = scenario.steps(&data);
        let mut progress = Progress::default();

        let result = match tokio::time::timeout(
            self.settings.scenario_timeout,
            self.run_steps(&ctx, engine.as_ref(), &steps, &mut report, &mut progress),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ScenarioError::Timeout {
                scenario: scenario.name.to_string(),
                seconds: self.settings.scenario_timeout.as_secs(),
            }),
        };

        if let Err(e) = result {
            warn!(scenario = scenario.name, error = %e, "scenario failed");
            report.outcome = ScenarioOutcome::Failed(e);
            report.enter(LifecycleState::Failed);
        }

        self.teardown(scenario, &data, engine.as_ref(), &progress, &mut report).await;

        report.finished_at = Utc::now();
        info!(
            scenario = scenario.name,
            outcome = ?report.last_state(),
            passed = report.passed(),
            "scenario finished"
        );
        report
    }

    async fn run_steps(
        &self,
        ctx: &ScenarioContext,
        engine: &dyn ApplyEngine,
        steps: &[TestStep],
        report: &mut ScenarioReport,
        progress: &mut Progress,
    ) -> Result<(), ScenarioError> {
        for (index, step) in steps.iter().enumerate() {
            ctx.guard()?;
            let outcome = match &step.kind {
                StepKind::Apply(_) if step.expected_error.is_some() => {
                    run_import_conflict_check(ctx, engine, step, index).await?;
                    StepOutcome::ExpectedError
                }
                StepKind::Apply(fixture) => {
                    progress.fixture = Some(fixture.clone());
                    let state = ctx
                        .bound(engine.apply(fixture))
                        .await?
                        .map_err(|source| ScenarioError::Apply { step: index, source })?;
                    report.enter(if progress.applied {
                        LifecycleState::Updated
                    } else {
                        LifecycleState::Applied
                    });
                    progress.applied = true;

                    self.apply_step(ctx, engine, step, index, fixture, &state, report)
                        .await?
                }
                StepKind::Import { address, ignore } => {
                    let fixture = progress.fixture.as_ref().ok_or_else(|| {
                        ScenarioError::assertion(address.as_str(), "import step before any apply")
                    })?;
                    let state = ctx.bound(engine.state()).await?;
                    run_import_verify(ctx, engine, &state, address, ignore, fixture).await?;
                    StepOutcome::Imported
                }
            };
            report.steps.push(StepReport { index, outcome });
        }
        Ok(())
    }

    /// Checks and the follow-up plan for a step whose apply succeeded.
    #[allow(clippy::too_many_arguments)]
    async fn apply_step(
        &self,
        ctx: &ScenarioContext,
        engine: &dyn ApplyEngine,
        step: &TestStep,
        index: usize,
        fixture: &Fixture,
        state: &StateSnapshot,
        report: &mut ScenarioReport,
    ) -> Result<StepOutcome, ScenarioError> {
        let mut drifted = false;
        for check in &step.checks {
            if evaluate(ctx, &self.registry, check, state).await? == CheckEffect::Drifted {
                drifted = true;
            }
        }
        report.enter(if drifted {
            LifecycleState::DisappearedExternally
        } else {
            LifecycleState::Asserted
        });

        let plan = ctx
            .bound(engine.plan(fixture))
            .await?
            .map_err(|source| ScenarioError::Apply { step: index, source })?;

        match (plan.is_empty(), drifted || step.expect_non_empty_plan) {
            (true, false) => Ok(StepOutcome::Applied),
            (false, true) => {
                report.enter(LifecycleState::PlanDiverged);
                Ok(StepOutcome::Drifted { plan })
            }
            (false, false) => Err(ScenarioError::UnexpectedDiff { step: index, plan }),
            (true, true) => {
                warn!(scenario = %ctx.scenario, step = index, "expected a non-empty plan, got none");
                Ok(StepOutcome::Applied)
            }
        }
    }

    /// Destroy whatever the scenario left behind and confirm every resource
    /// of the type under test is gone.
    async fn teardown(
        &self,
        scenario: &Scenario,
        data: &TestData,
        engine: &dyn ApplyEngine,
        progress: &Progress,
        report: &mut ScenarioReport,
    ) {
        let Some(fixture) = progress.fixture.as_ref() else {
            return;
        };
        let timeout = self.settings.teardown_timeout;
        let last_known = engine.state().await;

        let work = async {
            engine
                .destroy(fixture)
                .await
                .map_err(|e| ScenarioError::Teardown(format!("destroy: {}", e)))?;

            let ctx = ScenarioContext::new(scenario.name, data.clone(), timeout);
            for reference in last_known.of_type(scenario.resource_type) {
                let driver = self
                    .registry
                    .for_type(&reference.resource_type)
                    .map_err(|e| ScenarioError::lookup(reference.address().0, e))?;
                run_destroy_check(&ctx, driver.as_ref(), reference).await?;
            }
            Ok::<(), ScenarioError>(())
        };

        let result = match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(ScenarioError::Teardown(format!(
                "timed out after {}s",
                timeout.as_secs()
            ))),
        };

        match result {
            Ok(()) => {
                if report.passed() {
                    report.enter(LifecycleState::Destroyed);
                }
            }
            Err(ScenarioError::Teardown(message)) => {
                error!(scenario = scenario.name, %message, "teardown failed");
                report.teardown = Some(message);
            }
            Err(e) if report.passed() => {
                error!(scenario = scenario.name, error = %e, "destroy check failed");
                report.outcome = ScenarioOutcome::Failed(e);
                report.enter(LifecycleState::Failed);
            }
            Err(e) => {
                error!(scenario = scenario.name, error = %e, "destroy check failed");
                report.teardown = Some(e.to_string());
            }
        }
    }

    /// Run `scenarios` concurrently, at most `parallelism` at a time, each
    /// with fresh random names. Reports come back in input order.
    pub async fn run_scenarios(&self, scenarios: &[Scenario]) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %run_id,
            engine = self.engines.name(),
            drivers = ?self.registry.resource_types(),
            count = scenarios.len(),
            "run starting"
        );

        let permits = Arc::new(Semaphore::new(self.settings.parallelism.max(1)));
        let mut set = JoinSet::new();
        let mut spawned = HashMap::with_capacity(scenarios.len());
        for (order, scenario) in scenarios.iter().copied().enumerate() {
            let runner = self.clone();
            let permits = permits.clone();
            let handle = set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let data = TestData::seeded(
                    scenario.resource_type,
                    RESOURCE_LABEL,
                    Uuid::new_v4(),
                    runner.settings.locations.clone(),
                );
                runner.run_scenario(&scenario, data).await
            });
            spawned.insert(handle.id(), (order, scenario));
        }

        let mut reports = Vec::with_capacity(scenarios.len());
        while let Some(joined) = set.join_next_with_id().await {
            let (id, report) = match joined {
                Ok((id, report)) => (id, Ok(report)),
                Err(e) => (e.id(), Err(e)),
            };
            let Some((order, scenario)) = spawned.remove(&id) else {
                continue;
            };
            let report = report.unwrap_or_else(|e| {
                error!(%run_id, scenario = scenario.name, error = %e, "scenario task aborted");
                aborted_report(&scenario, e)
            });
            reports.push((order, report));
        }
        reports.sort_by_key(|(order, _)| *order);

        let report = RunReport {
            run_id,
            engine: self.engines.name().to_string(),
            started_at,
            finished_at: Utc::now(),
            scenarios: reports.into_iter().map(|(_, r)| r).collect(),
        };
        info!(
            %run_id,
            passed = report.passed(),
            failed = report.failed(),
            skipped = report.skipped(),
            "run finished"
        );
        report
    }
}

/// A failed report for a scenario whose task panicked or was cancelled.
fn aborted_report(scenario: &Scenario, e: JoinError) -> ScenarioReport {
    let message = if e.is_panic() {
        let payload = e.into_panic();
        payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panicked".to_string())
    } else {
        e.to_string()
    };
    let mut report = ScenarioReport::new(scenario.name, scenario.resource_type);
    report.outcome = ScenarioOutcome::Failed(ScenarioError::Aborted {
        scenario: scenario.name.to_string(),
        message,
    });
    report.enter(LifecycleState::Failed);
    report
}
