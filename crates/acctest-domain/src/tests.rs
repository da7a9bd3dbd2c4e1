use serde_json::json;

use crate::flatmap::{flatten, map_entries};
use crate::types::*;

#[test]
fn address_splits_type_and_name() {
    let addr = Address::parse("azurerm_storage_share.test").unwrap();
    assert_eq!(addr.resource_type(), "azurerm_storage_share");
    assert_eq!(addr.logical_name(), "test");
}

#[test]
fn address_rejects_missing_name() {
    assert!(Address::parse("azurerm_storage_share").is_err());
    assert!(Address::parse("azurerm_storage_share.").is_err());
    assert!(Address::parse("a.b.c").is_err());
}

#[test]
fn require_attr_treats_empty_as_missing() {
    let r = ResourceReference::new("azurerm_key_vault_secret", "test")
        .with_attr("name", "secret-abc")
        .with_attr("vault_uri", "");
    assert_eq!(r.require_attr("name").unwrap(), "secret-abc");
    let err = r.require_attr("vault_uri").unwrap_err();
    assert!(err.to_string().contains("azurerm_key_vault_secret.test"), "got: {}", err);
}

#[test]
fn state_filters_by_type() {
    let state: StateSnapshot = vec![
        ResourceReference::new("azurerm_resource_group", "test"),
        ResourceReference::new("azurerm_storage_share", "test"),
        ResourceReference::new("azurerm_storage_share", "import"),
    ]
    .into_iter()
    .collect();

    assert_eq!(state.len(), 3);
    assert_eq!(state.of_type("azurerm_storage_share").count(), 2);
    assert!(state.get("azurerm_resource_group.test").is_some());
    assert!(state.require("azurerm_key_vault.test").is_err());
}

#[test]
fn flatten_maps_and_blocks() {
    let attrs = json!({
        "name": "testshare",
        "quota": 5,
        "metadata": { "hello": "world", "happy": "birthday" },
        "acl": [
            { "id": "abc", "access_policy": [ { "permissions": "rwd" } ] }
        ],
        "url": null,
    });
    let flat = flatten(&attrs);
    assert_eq!(flat["quota"], "5");
    assert_eq!(flat["metadata.%"], "2");
    assert_eq!(flat["metadata.happy"], "birthday");
    assert_eq!(flat["acl.#"], "1");
    assert_eq!(flat["acl.0.id"], "abc");
    assert_eq!(flat["acl.0.access_policy.#"], "1");
    assert_eq!(flat["acl.0.access_policy.0.permissions"], "rwd");
    assert!(!flat.contains_key("acl.0.%"));
    assert!(!flat.contains_key("url"));
}

#[test]
fn map_entries_skips_count_and_nested() {
    let flat = flatten(&json!({ "tags": { "hello": "world" }, "acl": [ { "id": "x" } ] }));
    let tags = map_entries(&flat, "tags");
    assert_eq!(tags.len(), 1);
    assert_eq!(tags["hello"], "world");
    assert!(map_entries(&flat, "acl").is_empty());
}
