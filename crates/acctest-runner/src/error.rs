use acctest_driver::{ApplyError, LookupError, PlanSummary};
use thiserror::Error;

/// Why a scenario failed. Every variant names the entity involved.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Not found: {address}")]
    NotFound { address: String },

    #[error("looking up {address}: {source}")]
    Lookup {
        address: String,
        #[source]
        source: LookupError,
    },

    /// The expected import-required error did not happen, or did not match.
    #[error("step {step}: {message}")]
    ImportConflict { step: usize, message: String },

    #[error("{address}: {message}")]
    Assertion { address: String, message: String },

    #[error("{address} still exists in {parent}:\n{observed}")]
    StillExists {
        address: String,
        parent: String,
        observed: String,
    },

    #[error("step {step}: {source}")]
    Apply {
        step: usize,
        #[source]
        source: ApplyError,
    },

    #[error("step {step}: expected an empty plan after apply, got {plan}")]
    UnexpectedDiff { step: usize, plan: PlanSummary },

    #[error("teardown: {0}")]
    Teardown(String),

    #[error("scenario '{scenario}' timed out after {seconds}s")]
    Timeout { scenario: String, seconds: u64 },

    /// The scenario task died before producing a report.
    #[error("scenario '{scenario}' aborted: {message}")]
    Aborted { scenario: String, message: String },
}

impl ScenarioError {
    pub fn lookup(address: impl Into<String>, source: LookupError) -> Self {
        ScenarioError::Lookup {
            address: address.into(),
            source,
        }
    }

    pub fn assertion(address: impl Into<String>, message: impl Into<String>) -> Self {
        ScenarioError::Assertion {
            address: address.into(),
            message: message.into(),
        }
    }
}
