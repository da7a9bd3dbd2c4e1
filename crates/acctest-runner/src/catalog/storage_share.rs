use acctest_fixture::storage_share::{ACL_ID_ADDED, ACL_ID_ORIGINAL, RESOURCE_TYPE};
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
        Scenario {
            requires_import_feature: true,
            ..scenario("requires_import", requires_import)
        },
        scenario("disappears", disappears),
        scenario("metadata", metadata),
        scenario("acl", acl),
        scenario("update_quota", update_quota),
    ]
}

fn exists(data: &TestData, template: TemplateId) -> TestStep {
    TestStep::apply(generate(template, data)).check(Check::exists(&data.resource_name()))
}

fn basic(data: &TestData) -> Vec<TestStep> {
    vec![
        exists(data, TemplateId::StorageShareBasic),
        TestStep::import(data.resource_name()),
    ]
}

fn requires_import(data: &TestData) -> Vec<TestStep> {
    vec![
        exists(data, TemplateId::StorageShareBasic),
        TestStep::apply(generate(TemplateId::StorageShareRequiresImport, data))
            .expect_error(ExpectedError::requires_import(RESOURCE_TYPE)),
    ]
}

fn disappears(data: &TestData) -> Vec<TestStep> {
    vec![exists(data, TemplateId::StorageShareBasic)
        .check(Check::disappears(&data.resource_name()))
        .expect_non_empty_plan()]
}

fn metadata(data: &TestData) -> Vec<TestStep> {
    let address = data.resource_name();
    vec![
        exists(data, TemplateId::StorageShareMetadata)
            .check(Check::count(&address, "metadata", 1))
            .check(Check::observed(&address, "metadata.hello", "world")),
        TestStep::import(&address),
        exists(data, TemplateId::StorageShareMetadataUpdated)
            .check(Check::count(&address, "metadata", 2))
            .check(Check::observed(&address, "metadata.hello", "world"))
            .check(Check::observed(&address, "metadata.happy", "birthday")),
        TestStep::import(&address),
    ]
}

/// ACLs form a set in state, so entries are matched by id, never by index.
fn with_acls(step: TestStep, address: &str, ids: &[&str]) -> TestStep {
    ids.iter().fold(step.check(Check::count(address, "acl", ids.len())), |step, id| {
        step.check(Check::contains(address, "acl", "id", id))
            .check(Check::observed_contains(address, "acl", "id", id))
    })
}

fn acl(data: &TestData) -> Vec<TestStep> {
    let address = data.resource_name();
    vec![
        with_acls(exists(data, TemplateId::StorageShareAcl), &address, &[ACL_ID_ORIGINAL]),
        TestStep::import(&address),
        with_acls(
            exists(data, TemplateId::StorageShareAclUpdated),
            &address,
            &[ACL_ID_ADDED, ACL_ID_ORIGINAL],
        ),
        TestStep::import(&address),
        with_acls(exists(data, TemplateId::StorageShareAclReplaced), &address, &[ACL_ID_ADDED])
            .check(Check::attr(&address, "acl.0.access_policy.0.permissions", "rwd")),
        TestStep::import(&address),
    ]
}

fn update_quota(data: &TestData) -> Vec<TestStep> {
    let address = data.resource_name();
    vec![
        exists(data, TemplateId::StorageShareBasic),
        exists(data, TemplateId::StorageShareUpdateQuota)
            .check(Check::attr(&address, "quota", "5"))
            .check(Check::observed(&address, "quota", "5")),
    ]
}
