use std::sync::Arc;

use async_trait::async_trait;
use acctest_domain::{ResourceReference, StateSnapshot};
use acctest_fixture::Fixture;
use serde::{Deserialize, Serialize};

use crate::error::ApplyError;

/// Pending changes reported by a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub add: usize,
    pub change: usize,
    pub destroy: usize,
}

impl PlanSummary {
    pub fn is_empty(&self) -> bool {
        self.add == 0 && self.change == 0 && self.destroy == 0
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to add, {} to change, {} to destroy",
            self.add, self.change, self.destroy
        )
    }
}

/// Something that can turn a configuration into real resources and back.
///
/// An engine instance owns the state of exactly one scenario; the runner
/// never shares one between scenarios.
#[async_trait]
pub trait ApplyEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Converge on `fixture` and return the resulting state.
    ///
    /// Resources applied before a failure stay in state so teardown can
    /// reach them.
    async fn apply(&self, fixture: &Fixture) -> Result<StateSnapshot, ApplyError>;

    async fn plan(&self, fixture: &Fixture) -> Result<PlanSummary, ApplyError>;

    /// Import `id` as `address` into a scratch state. The engine's own state
    /// is left untouched.
    async fn import(
        &self,
        address: &str,
        id: &str,
        fixture: &Fixture,
    ) -> Result<ResourceReference, ApplyError>;

    /// Destroy everything in state. `fixture` is the last configuration applied.
    async fn destroy(&self, fixture: &Fixture) -> Result<(), ApplyError>;

    async fn state(&self) -> StateSnapshot;
}

/// Builds one fresh engine per scenario.
pub trait EngineFactory: Send + Sync {
    fn name(&self) -> &'static str;

    fn create(&self, scenario: &str) -> Result<Arc<dyn ApplyEngine>, ApplyError>;
}
