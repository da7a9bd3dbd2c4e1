use std::future::Future;
use std::time::Duration;

use acctest_domain::StateSnapshot;
use acctest_fixture::{Fixture, TestData};
use regex::Regex;
use tokio::time::Instant;

use crate::error::ScenarioError;

/// Named predicate over the post-apply state.
pub type StatePredicate = fn(&StateSnapshot) -> Result<(), String>;

/// One assertion run after a step's apply.
#[derive(Debug, Clone)]
pub enum Check {
    /// The resource at `address` resolves in the system of record.
    Exists(String),
    /// The resource at `address` no longer resolves.
    Destroyed(String),
    /// Delete the resource out-of-band.
    Disappears(String),
    /// Delete the resource's owning container out-of-band.
    ParentDisappears(String),
    /// State attribute equals `value`.
    AttrEquals {
        address: String,
        key: String,
        value: String,
    },
    /// Freshly observed attribute equals `value`.
    ObservedEquals {
        address: String,
        key: String,
        value: String,
    },
    /// `key.%` / `key.#` count in state.
    AttrCount {
        address: String,
        key: String,
        count: usize,
    },
    /// Some element of the `key` list has `field == value`. Scans every
    /// index, so element order does not matter. `observed` reads the
    /// system of record instead of state.
    SetContains {
        address: String,
        key: String,
        field: String,
        value: String,
        observed: bool,
    },
    Custom {
        name: &'static str,
        predicate: StatePredicate,
    },
}

impl Check {
    pub fn exists(address: &str) -> Self {
        Check::Exists(address.to_string())
    }

    pub fn destroyed(address: &str) -> Self {
        Check::Destroyed(address.to_string())
    }

    pub fn disappears(address: &str) -> Self {
        Check::Disappears(address.to_string())
    }

    pub fn parent_disappears(address: &str) -> Self {
        Check::ParentDisappears(address.to_string())
    }

    pub fn attr(address: &str, key: &str, value: &str) -> Self {
        Check::AttrEquals {
            address: address.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn observed(address: &str, key: &str, value: &str) -> Self {
        Check::ObservedEquals {
            address: address.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn count(address: &str, key: &str, count: usize) -> Self {
        Check::AttrCount {
            address: address.to_string(),
            key: key.to_string(),
            count,
        }
    }

    pub fn contains(address: &str, key: &str, field: &str, value: &str) -> Self {
        Check::SetContains {
            address: address.to_string(),
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
            observed: false,
        }
    }

    pub fn observed_contains(address: &str, key: &str, field: &str, value: &str) -> Self {
        Check::SetContains {
            address: address.to_string(),
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
            observed: true,
        }
    }

    pub fn custom(name: &'static str, predicate: StatePredicate) -> Self {
        Check::Custom { name, predicate }
    }

    /// Short label for logs and reports.
    pub fn describe(&self) -> String {
        match self {
            Check::Exists(a) => format!("exists({})", a),
            Check::Destroyed(a) => format!("destroyed({})", a),
            Check::Disappears(a) => format!("disappears({})", a),
            Check::ParentDisappears(a) => format!("parent_disappears({})", a),
            Check::AttrEquals { address, key, value } => format!("{}.{} == {:?}", address, key, value),
            Check::ObservedEquals { address, key, value } => {
                format!("observed {}.{} == {:?}", address, key, value)
            }
            Check::AttrCount { address, key, count } => format!("count {}.{} == {}", address, key, count),
            Check::SetContains {
                address,
                key,
                field,
                value,
                observed,
            } => format!(
                "{}{}.{}[*].{} contains {:?}",
                if *observed { "observed " } else { "" },
                address,
                key,
                field,
                value
            ),
            Check::Custom { name, .. } => name.to_string(),
        }
    }
}

/// The error a step is expected to fail with, as a regular expression.
///
/// The pattern is compiled when matched so a bad pattern fails the step
/// instead of the scenario declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedError {
    pattern: String,
}

impl ExpectedError {
    pub fn matching(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// The provider's "needs to be imported into the State" error for `resource_type`.
    pub fn requires_import(resource_type: &str) -> Self {
        let message = format!(
            "to be managed via Terraform this resource needs to be imported into the State. \
             Please see the resource documentation for \"{}\" for more information.",
            resource_type
        );
        Self::matching(regex::escape(&message))
    }

    pub fn is_match(&self, message: &str) -> Result<bool, regex::Error> {
        Ok(Regex::new(&self.pattern)?.is_match(message))
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

#[derive(Debug, Clone)]
pub enum StepKind {
    Apply(Fixture),
    /// Import `address` by its id and compare with the applied state.
    Import { address: String, ignore: Vec<String> },
}

/// One phase of a scenario.
#[derive(Debug, Clone)]
pub struct TestStep {
    pub kind: StepKind,
    pub expected_error: Option<ExpectedError>,
    pub checks: Vec<Check>,
    pub expect_non_empty_plan: bool,
}

impl TestStep {
    pub fn apply(fixture: Fixture) -> Self {
        Self {
            kind: StepKind::Apply(fixture),
            expected_error: None,
            checks: Vec::new(),
            expect_non_empty_plan: false,
        }
    }

    pub fn import(address: impl Into<String>) -> Self {
        Self {
            kind: StepKind::Import {
                address: address.into(),
                ignore: Vec::new(),
            },
            expected_error: None,
            checks: Vec::new(),
            expect_non_empty_plan: false,
        }
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn expect_error(mut self, expected: ExpectedError) -> Self {
        self.expected_error = Some(expected);
        self
    }

    pub fn expect_non_empty_plan(mut self) -> Self {
        self.expect_non_empty_plan = true;
        self
    }

    /// Attributes an import cannot recover. No-op on apply steps.
    pub fn ignore(mut self, key: &str) -> Self {
        if let StepKind::Import { ignore, .. } = &mut self.kind {
            ignore.push(key.to_string());
        }
        self
    }

    pub fn fixture(&self) -> Option<&Fixture> {
        match &self.kind {
            StepKind::Apply(f) => Some(f),
            StepKind::Import { .. } => None,
        }
    }
}

/// A named, ordered list of steps for one resource type.
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub resource_type: &'static str,
    /// Skipped unless resources are required to be imported.
    pub requires_import_feature: bool,
    pub build: fn(&TestData) -> Vec<TestStep>,
}

impl Scenario {
    pub fn steps(&self, data: &TestData) -> Vec<TestStep> {
        (self.build)(data)
    }
}

/// Per-scenario deadline threaded through every external call.
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    pub scenario: String,
    pub data: TestData,
    started: Instant,
    deadline: Instant,
}

impl ScenarioContext {
    pub fn new(scenario: impl Into<String>, data: TestData, budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            scenario: scenario.into(),
            data,
            started,
            deadline: started + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn timed_out(&self) -> ScenarioError {
        ScenarioError::Timeout {
            scenario: self.scenario.clone(),
            seconds: self.deadline.duration_since(self.started).as_secs(),
        }
    }

    /// Fail fast once the deadline has passed.
    pub fn guard(&self) -> Result<(), ScenarioError> {
        if Instant::now() >= self.deadline {
            return Err(self.timed_out());
        }
        Ok(())
    }

    /// Await `fut`, giving up at the deadline.
    pub async fn bound<F, T>(&self, fut: F) -> Result<T, ScenarioError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout_at(self.deadline, fut)
            .await
            .map_err(|_| self.timed_out())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acctest_fixture::Locations;

    #[test]
    fn requires_import_matches_provider_message() {
        let expected = ExpectedError::requires_import("azurerm_key_vault_secret");
        let message = acctest_driver::requires_import_message(
            "https://kv.vault.azure.net/secrets/s/v1",
            "azurerm_key_vault_secret",
        );
        assert!(expected.is_match(&message).unwrap());
        assert!(!expected
            .is_match(&acctest_driver::requires_import_message(
                "https://a.file.core.windows.net/s",
                "azurerm_storage_share",
            ))
            .unwrap());
    }

    #[test]
    fn invalid_pattern_is_an_error_when_matched() {
        assert!(ExpectedError::matching("(unclosed").is_match("x").is_err());
    }

    #[test]
    fn ignore_only_applies_to_import_steps() {
        let step = TestStep::import("azurerm_storage_share.test").ignore("acl");
        match step.kind {
            StepKind::Import { ignore, .. } => assert_eq!(ignore, vec!["acl".to_string()]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn context_times_out() {
        let data = TestData::new("t", "test", 1, "a", Locations::new("x", "y"));
        let ctx = ScenarioContext::new("slow", data, Duration::from_millis(20));
        let err = ctx
            .bound(tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::Timeout { .. }));
        assert!(ctx.guard().is_err());
    }
}
