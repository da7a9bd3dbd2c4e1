use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use acctest_driver::PlanSummary;

use crate::error::ScenarioError;

/// Where a scenario is in its lifecycle. Recorded in order as it moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Init,
    Applied,
    Asserted,
    Updated,
    DisappearedExternally,
    PlanDiverged,
    Destroyed,
    Failed,
}

/// How a single step ended when it did not simply apply cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    /// Apply was refused with the declared error.
    ExpectedError,
    /// Something was deleted out-of-band and the follow-up plan showed it.
    Drifted { plan: PlanSummary },
    Imported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    pub outcome: StepOutcome,
}

#[derive(Debug)]
pub enum ScenarioOutcome {
    Passed,
    Skipped(String),
    Failed(ScenarioError),
}

impl ScenarioOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ScenarioOutcome::Failed(_))
    }
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum OutcomeRepr<'a> {
    Passed,
    Skipped { reason: &'a str },
    Failed { error: String },
}

impl Serialize for ScenarioOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match self {
            ScenarioOutcome::Passed => OutcomeRepr::Passed,
            ScenarioOutcome::Skipped(reason) => OutcomeRepr::Skipped { reason },
            ScenarioOutcome::Failed(e) => OutcomeRepr::Failed { error: e.to_string() },
        };
        repr.serialize(serializer)
    }
}

#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub resource_type: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub transitions: Vec<LifecycleState>,
    pub steps: Vec<StepReport>,
    pub outcome: ScenarioOutcome,
    /// Destroy or destroy-check failure. Never replaces `outcome`.
    pub teardown: Option<String>,
}

impl ScenarioReport {
    pub fn new(name: &str, resource_type: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            resource_type: resource_type.to_string(),
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            transitions: vec![LifecycleState::Init],
            steps: Vec::new(),
            outcome: ScenarioOutcome::Passed,
            teardown: None,
        }
    }

    pub fn skipped(name: &str, resource_type: &str, reason: impl Into<String>) -> Self {
        let mut report = Self::new(name, resource_type);
        report.outcome = ScenarioOutcome::Skipped(reason.into());
        report
    }

    pub fn enter(&mut self, state: LifecycleState) {
        self.transitions.push(state);
    }

    pub fn last_state(&self) -> LifecycleState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(LifecycleState::Init)
    }

    pub fn passed(&self) -> bool {
        matches!(self.outcome, ScenarioOutcome::Passed)
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub engine: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scenarios: Vec<ScenarioReport>,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.scenarios.iter().filter(|s| s.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.scenarios.iter().filter(|s| s.outcome.is_failed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.scenarios
            .iter()
            .filter(|s| matches!(s.outcome, ScenarioOutcome::Skipped(_)))
            .count()
    }

    /// A teardown problem fails the run even when the scenario passed.
    pub fn is_success(&self) -> bool {
        self.scenarios
            .iter()
            .all(|s| !s.outcome.is_failed() && s.teardown.is_none())
    }
}
