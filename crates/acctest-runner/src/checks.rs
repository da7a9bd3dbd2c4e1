//! Lifecycle assertions against the system of record and the apply engine.

use std::collections::BTreeSet;

use acctest_domain::{ExternalHandle, Locator, ResourceReference, StateSnapshot};
use std::sync::Arc;

use acctest_driver::{
    resolve, ApplyEngine, ApplyError, DeleteOutcome, DriverRegistry, LookupError, Purpose,
    ResourceDriver, Verdict,
};
use acctest_fixture::Fixture;
use tracing::{debug, info};

use crate::error::ScenarioError;
use crate::scenario::{Check, ScenarioContext, StepKind, TestStep};

/// What a check did to the world, beyond passing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckEffect {
    None,
    /// Something was deleted out-of-band; the next plan will not be empty.
    Drifted,
}

fn describe_parent(locator: &Locator) -> String {
    format!("{} {}", locator.parent_type, locator.parent)
}

pub async fn run_existence_check(
    ctx: &ScenarioContext,
    driver: &dyn ResourceDriver,
    reference: &ResourceReference,
) -> Result<ExternalHandle, ScenarioError> {
    let address = reference.address().0;
    let resolution = ctx
        .bound(resolve(driver, reference))
        .await?
        .map_err(|e| ScenarioError::lookup(&address, e))?;

    match resolution.for_purpose(Purpose::ConfirmExistence) {
        Verdict::Present(handle) => {
            debug!(%address, name = %handle.name, "exists");
            Ok(handle)
        }
        Verdict::Absent(locator) => Err(ScenarioError::assertion(
            address,
            format!(
                "Bad: {} {:?} does not exist in {}",
                locator.resource_type,
                locator.name,
                describe_parent(&locator)
            ),
        )),
        Verdict::ParentMissing(locator) => Err(ScenarioError::assertion(
            address,
            format!(
                "Bad: {} {:?} cannot exist, its parent {} was not found",
                locator.resource_type,
                locator.name,
                describe_parent(&locator)
            ),
        )),
    }
}

/// Succeeds on any absence, including a missing parent.
pub async fn run_destroy_check(
    ctx: &ScenarioContext,
    driver: &dyn ResourceDriver,
    reference: &ResourceReference,
) -> Result<(), ScenarioError> {
    let address = reference.address().0;
    let resolution = ctx
        .bound(resolve(driver, reference))
        .await?
        .map_err(|e| ScenarioError::lookup(&address, e))?;

    match resolution.for_purpose(Purpose::ConfirmDestruction) {
        Verdict::Present(handle) => {
            let observed = serde_json::to_string_pretty(&handle.raw)
                .unwrap_or_else(|_| format!("{:?}", handle.observed));
            Err(ScenarioError::StillExists {
                address,
                parent: format!("{} {}", handle.parent.parent_type, handle.parent.name),
                observed,
            })
        }
        Verdict::Absent(_) | Verdict::ParentMissing(_) => {
            debug!(%address, "confirmed destroyed");
            Ok(())
        }
    }
}

/// Delete the resource behind the engine's back.
pub async fn run_disappear_check(
    ctx: &ScenarioContext,
    driver: &dyn ResourceDriver,
    reference: &ResourceReference,
) -> Result<DeleteOutcome, ScenarioError> {
    let address = reference.address().0;
    let lookup = |e: LookupError| ScenarioError::lookup(&address, e);

    let locator = driver.locate(reference).map_err(lookup)?;
    let parent = match ctx.bound(driver.find_parent(&locator)).await?.map_err(lookup)? {
        Some(p) => p,
        None => {
            info!(%address, parent = %locator.parent, "parent already gone");
            return Ok(DeleteOutcome::AlreadyAbsent);
        }
    };

    let outcome = ctx
        .bound(driver.delete(&parent, &locator.name))
        .await?
        .map_err(lookup)?;
    info!(%address, ?outcome, "deleted out-of-band");
    Ok(outcome)
}

/// Delete the owning container behind the engine's back.
pub async fn run_parent_disappear_check(
    ctx: &ScenarioContext,
    driver: &dyn ResourceDriver,
    reference: &ResourceReference,
) -> Result<DeleteOutcome, ScenarioError> {
    let address = reference.address().0;
    let lookup = |e: LookupError| ScenarioError::lookup(&address, e);

    let locator = driver.locate(reference).map_err(lookup)?;
    let parent = match ctx.bound(driver.find_parent(&locator)).await?.map_err(lookup)? {
        Some(p) => p,
        None => return Ok(DeleteOutcome::AlreadyAbsent),
    };

    let outcome = ctx
        .bound(driver.delete_parent(&parent))
        .await?
        .map_err(lookup)?;
    info!(%address, parent = %parent.id, ?outcome, "parent deleted out-of-band");
    Ok(outcome)
}

/// Apply a step that re-declares an existing resource and require the
/// engine to refuse it with an error matching the step's pattern.
pub async fn run_import_conflict_check(
    ctx: &ScenarioContext,
    engine: &dyn ApplyEngine,
    step: &TestStep,
    index: usize,
) -> Result<(), ScenarioError> {
    let conflict = |message: String| ScenarioError::ImportConflict { step: index, message };

    let expected = step
        .expected_error
        .as_ref()
        .ok_or_else(|| conflict("step declares no expected error".into()))?;
    let fixture = match &step.kind {
        StepKind::Apply(f) => f,
        StepKind::Import { .. } => return Err(conflict("only apply steps can expect an error".into())),
    };

    match ctx.bound(engine.apply(fixture)).await? {
        Ok(_) => Err(conflict(format!(
            "expected an error matching {:?}, but apply succeeded",
            expected.as_str()
        ))),
        Err(e) => {
            let message = e.to_string();
            let matched = expected
                .is_match(&message)
                .map_err(|re| conflict(format!("invalid expected error pattern: {}", re)))?;
            if matched {
                if let ApplyError::ImportRequired { address, id, .. } = &e {
                    info!(%address, %id, "apply refused as expected");
                }
                Ok(())
            } else {
                Err(conflict(format!(
                    "expected an error matching {:?}, got: {}",
                    expected.as_str(),
                    message
                )))
            }
        }
    }
}

/// Import `address` by the id recorded in `state` and require the imported
/// attributes to match, apart from `ignore` (and anything nested under it).
pub async fn run_import_verify(
    ctx: &ScenarioContext,
    engine: &dyn ApplyEngine,
    state: &StateSnapshot,
    address: &str,
    ignore: &[String],
    fixture: &Fixture,
) -> Result<(), ScenarioError> {
    let applied = state.get(address).ok_or_else(|| ScenarioError::NotFound {
        address: address.to_string(),
    })?;
    let id = applied
        .id()
        .ok_or_else(|| ScenarioError::assertion(address, "no id in state to import by"))?;

    let imported = ctx
        .bound(engine.import(address, id, fixture))
        .await?
        .map_err(|e| ScenarioError::assertion(address, format!("import of {:?} failed: {}", id, e)))?;

    let ignored = |key: &str| {
        ignore
            .iter()
            .any(|i| key == i.as_str() || key.starts_with(&format!("{}.", i)))
    };
    let keys: BTreeSet<&String> = applied
        .attributes
        .keys()
        .chain(imported.attributes.keys())
        .filter(|k| !ignored(k.as_str()))
        .collect();

    let diffs: Vec<String> = keys
        .into_iter()
        .filter_map(|k| {
            let before = applied.attributes.get(k);
            let after = imported.attributes.get(k);
            (before != after).then(|| format!("  {}: {:?} (state) != {:?} (imported)", k, before, after))
        })
        .collect();

    if diffs.is_empty() {
        debug!(address, id, "import matches state");
        Ok(())
    } else {
        Err(ScenarioError::assertion(
            address,
            format!("imported attributes differ from state:\n{}", diffs.join("\n")),
        ))
    }
}

pub fn check_attr_equals(
    state: &StateSnapshot,
    address: &str,
    key: &str,
    value: &str,
) -> Result<(), ScenarioError> {
    let reference = require(state, address)?;
    match reference.attr(key) {
        Some(actual) if actual == value => Ok(()),
        Some(actual) => Err(ScenarioError::assertion(
            address,
            format!("Attribute '{}' expected {:?}, got {:?}", key, value, actual),
        )),
        None => Err(ScenarioError::assertion(
            address,
            format!("Attribute '{}' expected {:?}, not set", key, value),
        )),
    }
}

/// Compare the size of a flattened map (`key.%`) or list (`key.#`).
pub fn check_attr_count(
    state: &StateSnapshot,
    address: &str,
    key: &str,
    count: usize,
) -> Result<(), ScenarioError> {
    let reference = require(state, address)?;
    let actual = reference
        .attr(&format!("{}.%", key))
        .or_else(|| reference.attr(&format!("{}.#", key)))
        .unwrap_or("0");
    if actual == count.to_string() {
        Ok(())
    } else {
        Err(ScenarioError::assertion(
            address,
            format!("Attribute '{}' expected {} entries, got {}", key, count, actual),
        ))
    }
}

/// Whether any element of the flattened list `key` has `field == value`.
fn list_contains<'a>(
    lookup: impl Fn(&str) -> Option<&'a str>,
    key: &str,
    field: &str,
    value: &str,
) -> Result<(), String> {
    let len = lookup(&format!("{}.#", key))
        .and_then(|n| n.parse::<usize>().ok())
        .unwrap_or(0);
    let seen: Vec<&str> = (0..len)
        .filter_map(|i| lookup(&format!("{}.{}.{}", key, i, field)))
        .collect();
    if seen.contains(&value) {
        Ok(())
    } else {
        Err(format!(
            "no '{}' entry with {} = {:?}, have {:?}",
            key, field, value, seen
        ))
    }
}

fn require<'a>(state: &'a StateSnapshot, address: &str) -> Result<&'a ResourceReference, ScenarioError> {
    state.get(address).ok_or_else(|| ScenarioError::NotFound {
        address: address.to_string(),
    })
}

fn target<'a>(
    state: &'a StateSnapshot,
    registry: &DriverRegistry,
    address: &str,
) -> Result<(&'a ResourceReference, Arc<dyn ResourceDriver>), ScenarioError> {
    let reference = require(state, address)?;
    let driver = registry
        .for_type(&reference.resource_type)
        .map_err(|e| ScenarioError::lookup(address, e))?;
    Ok((reference, driver))
}

/// Run one declared check against `state`.
pub async fn evaluate(
    ctx: &ScenarioContext,
    registry: &DriverRegistry,
    check: &Check,
    state: &StateSnapshot,
) -> Result<CheckEffect, ScenarioError> {
    ctx.guard()?;
    debug!(scenario = %ctx.scenario, check = %check.describe(), "checking");

    match check {
        Check::Exists(address) => {
            let (reference, driver) = target(state, registry, address)?;
            run_existence_check(ctx, driver.as_ref(), reference).await?;
        }
        Check::Destroyed(address) => {
            let (reference, driver) = target(state, registry, address)?;
            run_destroy_check(ctx, driver.as_ref(), reference).await?;
        }
        Check::Disappears(address) => {
            let (reference, driver) = target(state, registry, address)?;
            run_disappear_check(ctx, driver.as_ref(), reference).await?;
            return Ok(CheckEffect::Drifted);
        }
        Check::ParentDisappears(address) => {
            let (reference, driver) = target(state, registry, address)?;
            run_parent_disappear_check(ctx, driver.as_ref(), reference).await?;
            return Ok(CheckEffect::Drifted);
        }
        Check::AttrEquals { address, key, value } => check_attr_equals(state, address, key, value)?,
        Check::AttrCount { address, key, count } => check_attr_count(state, address, key, *count)?,
        Check::ObservedEquals { address, key, value } => {
            let (reference, driver) = target(state, registry, address)?;
            let handle = run_existence_check(ctx, driver.as_ref(), reference).await?;
            match handle.observed(key) {
                Some(actual) if actual == value.as_str() => {}
                actual => {
                    return Err(ScenarioError::assertion(
                        address.as_str(),
                        format!("Observed '{}' expected {:?}, got {:?}", key, value, actual),
                    ))
                }
            }
        }
        Check::SetContains {
            address,
            key,
            field,
            value,
            observed: false,
        } => {
            let reference = require(state, address)?;
            list_contains(|k| reference.attr(k), key, field, value)
                .map_err(|message| ScenarioError::assertion(address.as_str(), message))?
        }
        Check::SetContains {
            address,
            key,
            field,
            value,
            observed: true,
        } => {
            let (reference, driver) = target(state, registry, address)?;
            let handle = run_existence_check(ctx, driver.as_ref(), reference).await?;
            list_contains(|k| handle.observed(k), key, field, value)
                .map_err(|message| ScenarioError::assertion(address.as_str(), format!("observed {}", message)))?
        }
        Check::Custom { name, predicate } => {
            predicate(state).map_err(|message| ScenarioError::assertion(*name, message))?
        }
    }
    Ok(CheckEffect::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use acctest_driver::{InMemoryRecords, LocalEngine, MemoryDriver};
    use acctest_fixture::{generate, Locations, TemplateId, TestData};
    use pretty_assertions::assert_eq;

    const SECRET: &str = "azurerm_key_vault_secret.test";
    const SHARE: &str = "azurerm_storage_share.test";

    fn data(resource_type: &str) -> TestData {
        TestData::new(resource_type, "test", 42, "xyzzy", Locations::new("westeurope", "northeurope"))
    }

    fn ctx(resource_type: &str) -> ScenarioContext {
        ScenarioContext::new("checks", data(resource_type), Duration::from_secs(30))
    }

    fn registry(records: &InMemoryRecords) -> DriverRegistry {
        let mut registry = DriverRegistry::new();
        registry
            .register(Arc::new(MemoryDriver::key_vault_secrets(records.clone())))
            .register(Arc::new(MemoryDriver::storage_shares(records.clone())));
        registry
    }

    async fn applied(template: TemplateId, resource_type: &str) -> (InMemoryRecords, LocalEngine, StateSnapshot) {
        let records = InMemoryRecords::new();
        let engine = LocalEngine::new(records.clone());
        let state = engine.apply(&generate(template, &data(resource_type))).await.unwrap();
        (records, engine, state)
    }

    #[tokio::test]
    async fn existence_then_disappear_then_destroyed() {
        let (records, _engine, state) =
            applied(TemplateId::StorageShareBasic, "azurerm_storage_share").await;
        let registry = registry(&records);
        let ctx = ctx("azurerm_storage_share");
        let driver = registry.for_type("azurerm_storage_share").unwrap();
        let reference = state.get(SHARE).unwrap();

        run_existence_check(&ctx, driver.as_ref(), reference).await.unwrap();
        assert!(run_destroy_check(&ctx, driver.as_ref(), reference).await.is_err());

        let outcome = run_disappear_check(&ctx, driver.as_ref(), reference).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
        let again = run_disappear_check(&ctx, driver.as_ref(), reference).await.unwrap();
        assert_eq!(again, DeleteOutcome::AlreadyAbsent);

        run_destroy_check(&ctx, driver.as_ref(), reference).await.unwrap();
        let err = run_existence_check(&ctx, driver.as_ref(), reference).await.unwrap_err();
        assert!(err.to_string().contains("does not exist"), "got: {}", err);
    }

    #[tokio::test]
    async fn parent_absence_splits_by_purpose() {
        let (records, _engine, state) =
            applied(TemplateId::KeyVaultSecretBasic, "azurerm_key_vault_secret").await;
        let registry = registry(&records);
        let ctx = ctx("azurerm_key_vault_secret");
        let driver = registry.for_type("azurerm_key_vault_secret").unwrap();
        let reference = state.get(SECRET).unwrap();

        run_parent_disappear_check(&ctx, driver.as_ref(), reference).await.unwrap();

        run_destroy_check(&ctx, driver.as_ref(), reference).await.unwrap();
        let err = run_existence_check(&ctx, driver.as_ref(), reference).await.unwrap_err();
        assert!(err.to_string().contains("parent"), "got: {}", err);
        assert!(err.to_string().contains(SECRET), "got: {}", err);
    }

    #[tokio::test]
    async fn still_exists_reports_observed_state() {
        let (records, _engine, state) =
            applied(TemplateId::KeyVaultSecretBasic, "azurerm_key_vault_secret").await;
        let registry = registry(&records);
        let driver = registry.for_type("azurerm_key_vault_secret").unwrap();

        let err = run_destroy_check(&ctx("azurerm_key_vault_secret"), driver.as_ref(), state.get(SECRET).unwrap())
            .await
            .unwrap_err();
        match err {
            ScenarioError::StillExists { observed, parent, .. } => {
                assert!(observed.contains("rick-and-morty"));
                assert!(parent.contains("acctestkv-xyzzy"));
            }
            other => panic!("expected StillExists, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn import_conflict_matches_requires_import_error() {
        let (_records, engine, _state) =
            applied(TemplateId::StorageShareBasic, "azurerm_storage_share").await;
        let ctx = ctx("azurerm_storage_share");

        let step = TestStep::apply(generate(
            TemplateId::StorageShareRequiresImport,
            &data("azurerm_storage_share"),
        ))
        .expect_error(crate::scenario::ExpectedError::requires_import("azurerm_storage_share"));
        run_import_conflict_check(&ctx, &engine, &step, 1).await.unwrap();

        let wrong = TestStep::apply(generate(
            TemplateId::StorageShareRequiresImport,
            &data("azurerm_storage_share"),
        ))
        .expect_error(crate::scenario::ExpectedError::requires_import("azurerm_key_vault_secret"));
        let err = run_import_conflict_check(&ctx, &engine, &wrong, 1).await.unwrap_err();
        assert!(matches!(err, ScenarioError::ImportConflict { step: 1, .. }));
    }

    #[tokio::test]
    async fn import_conflict_fails_when_apply_succeeds() {
        let (_records, engine, _state) =
            applied(TemplateId::StorageShareBasic, "azurerm_storage_share").await;
        let step = TestStep::apply(generate(TemplateId::StorageShareBasic, &data("azurerm_storage_share")))
            .expect_error(crate::scenario::ExpectedError::requires_import("azurerm_storage_share"));
        let err = run_import_conflict_check(&ctx("azurerm_storage_share"), &engine, &step, 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("apply succeeded"), "got: {}", err);
    }

    #[tokio::test]
    async fn import_verify_compares_attributes() {
        let template = TemplateId::StorageShareMetadata;
        let (_records, engine, state) = applied(template, "azurerm_storage_share").await;
        let fixture = generate(template, &data("azurerm_storage_share"));

        run_import_verify(&ctx("azurerm_storage_share"), &engine, &state, SHARE, &[], &fixture)
            .await
            .unwrap();

        let mut tampered = state.clone();
        let mut share = state.get(SHARE).unwrap().clone();
        share.attributes.insert("metadata.hello".into(), "mars".into());
        tampered.insert(share);
        let err = run_import_verify(&ctx("azurerm_storage_share"), &engine, &tampered, SHARE, &[], &fixture)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("metadata.hello"), "got: {}", err);

        run_import_verify(
            &ctx("azurerm_storage_share"),
            &engine,
            &tampered,
            SHARE,
            &["metadata".to_string()],
            &fixture,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn attribute_checks() {
        let (records, _engine, state) =
            applied(TemplateId::KeyVaultSecretComplete, "azurerm_key_vault_secret").await;
        let registry = registry(&records);
        let ctx = ctx("azurerm_key_vault_secret");

        for check in [
            Check::attr(SECRET, "tags.hello", "world"),
            Check::count(SECRET, "tags", 1),
            Check::observed(SECRET, "content_type", "application/xml"),
            Check::custom("has_expiry", |s| {
                s.get(SECRET)
                    .and_then(|r| r.attr("expiration_date"))
                    .map(|_| ())
                    .ok_or_else(|| "no expiration_date".to_string())
            }),
        ] {
            let effect = evaluate(&ctx, &registry, &check, &state).await.unwrap();
            assert_eq!(effect, CheckEffect::None);
        }

        let err = evaluate(&ctx, &registry, &Check::attr(SECRET, "value", "szechuan"), &state)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("\"szechuan\""), "got: {}", err);

        let err = evaluate(&ctx, &registry, &Check::exists("azurerm_key_vault_secret.other"), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::NotFound { .. }));
    }

    #[tokio::test]
    async fn set_membership_ignores_element_order() {
        let (records, _engine, state) =
            applied(TemplateId::StorageShareAclUpdated, "azurerm_storage_share").await;
        let registry = registry(&records);
        let ctx = ctx("azurerm_storage_share");
        let share = state.get(SHARE).unwrap();
        let first = share.attr("acl.0.id").unwrap().to_string();
        let second = share.attr("acl.1.id").unwrap().to_string();

        for id in [&second, &first] {
            for check in [
                Check::contains(SHARE, "acl", "id", id),
                Check::observed_contains(SHARE, "acl", "id", id),
            ] {
                let effect = evaluate(&ctx, &registry, &check, &state).await.unwrap();
                assert_eq!(effect, CheckEffect::None);
            }
        }

        let err = evaluate(&ctx, &registry, &Check::contains(SHARE, "acl", "id", "nope"), &state)
            .await
            .unwrap_err();
        assert!(err.to_string().contains(&first), "got: {}", err);
        assert!(evaluate(&ctx, &registry, &Check::observed_contains(SHARE, "acl", "id", "nope"), &state)
            .await
            .is_err());
    }

    #[test]
    fn list_contains_scans_every_index() {
        let reference = ResourceReference::new("azurerm_storage_share", "test")
            .with_attr("acl.#", "2")
            .with_attr("acl.0.id", "b")
            .with_attr("acl.1.id", "a");
        assert!(list_contains(|k| reference.attr(k), "acl", "id", "a").is_ok());
        assert!(list_contains(|k| reference.attr(k), "acl", "id", "b").is_ok());
        assert!(list_contains(|k| reference.attr(k), "acl", "id", "c").is_err());
        assert!(list_contains(|k| reference.attr(k), "missing", "id", "a").is_err());
    }
}
