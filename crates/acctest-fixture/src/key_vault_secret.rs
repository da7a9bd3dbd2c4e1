//! Configuration templates for `azurerm_key_vault_secret` scenarios.

use crate::data::TestData;
use crate::hcl::{Block, Document, Expr};

pub const RESOURCE_TYPE: &str = "azurerm_key_vault_secret";
pub const PARENT_TYPE: &str = "azurerm_key_vault";

/// Client config data source, resource group and a premium key vault whose
/// access policy grants the caller `get`/`delete`/`set` on secrets.
fn prerequisites(data: &TestData, key_permission: &str) -> Document {
    let client_config = Block::data("azurerm_client_config", "current");

    let resource_group = Block::resource("azurerm_resource_group", "test")
        .attr("name", Expr::string(format!("acctestRG-{}", data.random_integer)))
        .attr("location", Expr::string(&data.locations.primary));

    let access_policy = Block::nested("access_policy")
        .attr("tenant_id", Expr::reference("data.azurerm_client_config.current.tenant_id"))
        .attr(
            "object_id",
            Expr::reference("data.azurerm_client_config.current.service_principal_object_id"),
        )
        .gap()
        .attr("key_permissions", Expr::strings([key_permission]))
        .gap()
        .attr("secret_permissions", Expr::strings(["get", "delete", "set"]));

    let key_vault = Block::resource(PARENT_TYPE, "test")
        .attr("name", Expr::string(format!("acctestkv-{}", data.random_string)))
        .attr("location", Expr::reference("azurerm_resource_group.test.location"))
        .attr("resource_group_name", Expr::reference("azurerm_resource_group.test.name"))
        .attr("tenant_id", Expr::reference("data.azurerm_client_config.current.tenant_id"))
        .gap()
        .attr("sku_name", Expr::string("premium"))
        .block(access_policy)
        .attr("tags", Expr::string_map([("environment", "Production")]));

    Document::new()
        .push(client_config)
        .push(resource_group)
        .push(key_vault)
}

fn secret_name(data: &TestData) -> Expr {
    Expr::string(format!("secret-{}", data.random_string))
}

/// Secret addressed through the vault's resource id.
pub fn basic(data: &TestData) -> Document {
    let secret = Block::resource(RESOURCE_TYPE, &data.resource_label)
        .attr("name", secret_name(data))
        .attr("value", Expr::string("rick-and-morty"))
        .attr("key_vault_id", Expr::reference("azurerm_key_vault.test.id"));
    prerequisites(data, "get").push(secret)
}

/// Secret addressed through the legacy `vault_uri` field.
pub fn basic_classic(data: &TestData) -> Document {
    let secret = Block::resource(RESOURCE_TYPE, &data.resource_label)
        .attr("name", secret_name(data))
        .attr("value", Expr::string("rick-and-morty"))
        .attr("vault_uri", Expr::reference("azurerm_key_vault.test.vault_uri"));
    prerequisites(data, "get").push(secret)
}

/// [`basic`] plus a second block declaring the same secret under `import`.
pub fn requires_import(data: &TestData) -> Document {
    let existing = format!("{}.{}", RESOURCE_TYPE, data.resource_label);
    let duplicate = Block::resource(RESOURCE_TYPE, "import")
        .attr("name", Expr::reference(&format!("{}.name", existing)))
        .attr("value", Expr::reference(&format!("{}.value", existing)))
        .attr("key_vault_id", Expr::reference(&format!("{}.key_vault_id", existing)));
    basic(data).push(duplicate)
}

/// Every optional attribute: content type, validity window and tags.
pub fn complete(data: &TestData) -> Document {
    let secret = Block::resource(RESOURCE_TYPE, &data.resource_label)
        .attr("name", secret_name(data))
        .attr("value", Expr::string("<rick><morty /></rick>"))
        .attr("key_vault_id", Expr::reference("azurerm_key_vault.test.id"))
        .attr("content_type", Expr::string("application/xml"))
        .attr("not_before_date", Expr::string("2019-01-01T01:02:03Z"))
        .attr("expiration_date", Expr::string("2020-01-01T01:02:03Z"))
        .attr("tags", Expr::string_map([("hello", "world")]));
    prerequisites(data, "create").push(secret)
}

/// Same secret as [`basic_classic`] with a new value.
pub fn basic_updated(data: &TestData) -> Document {
    let secret = Block::resource(RESOURCE_TYPE, &data.resource_label)
        .attr("name", secret_name(data))
        .attr("value", Expr::string("szechuan"))
        .attr("vault_uri", Expr::reference("azurerm_key_vault.test.vault_uri"));
    prerequisites(data, "create").push(secret)
}
