use acctest_fixture::key_vault_secret::RESOURCE_TYPE;
use acctest_fixture::{generate, TemplateId, TestData};

use crate::scenario::{Check, ExpectedError, Scenario, TestStep};

pub fn scenarios() -> Vec<Scenario> {
    let scenario = |name: &'static str, build: fn(&TestData) -> Vec<TestStep>| Scenario {
        name,
        resource_type: RESOURCE_TYPE,
        requires_import_feature: false,
        build,
    };
    vec![
        scenario("basic", basic),
        scenario("basic_classic", basic_classic),
        Scenario {
            requires_import_feature: true,
            ..scenario("requires_import", requires_import)
        },
        scenario("disappears", disappears),
        scenario("disappears_when_parent_deleted", disappears_when_parent_deleted),
        scenario("complete", complete),
        scenario("update", update),
    ]
}

fn created(data: &TestData, template: TemplateId) -> TestStep {
    let address = data.resource_name();
    TestStep::apply(generate(template, data))
        .check(Check::exists(&address))
        .check(Check::attr(&address, "value", "rick-and-morty"))
}

fn basic(data: &TestData) -> Vec<TestStep> {
    vec![
        created(data, TemplateId::KeyVaultSecretBasic),
        TestStep::import(data.resource_name()),
    ]
}

fn basic_classic(data: &TestData) -> Vec<TestStep> {
    vec![
        created(data, TemplateId::KeyVaultSecretBasicClassic),
        TestStep::import(data.resource_name()),
    ]
}

fn requires_import(data: &TestData) -> Vec<TestStep> {
    vec![
        created(data, TemplateId::KeyVaultSecretBasic),
        TestStep::apply(generate(TemplateId::KeyVaultSecretRequiresImport, data))
            .expect_error(ExpectedError::requires_import(RESOURCE_TYPE)),
    ]
}

fn disappears(data: &TestData) -> Vec<TestStep> {
    let address = data.resource_name();
    vec![TestStep::apply(generate(TemplateId::KeyVaultSecretBasic, data))
        .check(Check::exists(&address))
        .check(Check::disappears(&address))
        .expect_non_empty_plan()]
}

/// The vault goes away out-of-band; the secret must read as destroyed
/// through the missing parent.
fn disappears_when_parent_deleted(data: &TestData) -> Vec<TestStep> {
    let address = data.resource_name();
    vec![TestStep::apply(generate(TemplateId::KeyVaultSecretBasic, data))
        .check(Check::exists(&address))
        .check(Check::parent_disappears(&address))
        .check(Check::destroyed(&address))
        .expect_non_empty_plan()]
}

fn complete(data: &TestData) -> Vec<TestStep> {
    let address = data.resource_name();
    vec![
        TestStep::apply(generate(TemplateId::KeyVaultSecretComplete, data))
            .check(Check::exists(&address))
            .check(Check::attr(&address, "not_before_date", "2019-01-01T01:02:03Z"))
            .check(Check::attr(&address, "expiration_date", "2020-01-01T01:02:03Z"))
            .check(Check::count(&address, "tags", 1))
            .check(Check::attr(&address, "tags.hello", "world"))
            .check(Check::observed(&address, "content_type", "application/xml")),
        TestStep::import(&address),
    ]
}

fn update(data: &TestData) -> Vec<TestStep> {
    let address = data.resource_name();
    vec![
        created(data, TemplateId::KeyVaultSecretBasicClassic),
        TestStep::apply(generate(TemplateId::KeyVaultSecretBasicUpdated, data))
            .check(Check::exists(&address))
            .check(Check::attr(&address, "value", "szechuan"))
            .check(Check::observed(&address, "value", "szechuan")),
    ]
}
