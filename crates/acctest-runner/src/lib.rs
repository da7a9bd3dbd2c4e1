pub mod catalog;
pub mod checks;
pub mod error;
pub mod report;
pub mod runner;
pub mod scenario;

pub use catalog::{catalog, find};
pub use checks::CheckEffect;
pub use error::ScenarioError;
pub use report::{LifecycleState, RunReport, ScenarioOutcome, ScenarioReport, StepOutcome, StepReport};
pub use runner::{Runner, RunnerSettings, RESOURCE_LABEL};
pub use scenario::{Check, ExpectedError, Scenario, ScenarioContext, StepKind, TestStep};
