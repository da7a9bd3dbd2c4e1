//! Configuration templates for `azurerm_storage_share` scenarios.

use crate::data::TestData;
use crate::hcl::{Block, Document, Expr};

pub const RESOURCE_TYPE: &str = "azurerm_storage_share";
pub const PARENT_TYPE: &str = "azurerm_storage_account";

pub const ACL_ID_ORIGINAL: &str = "MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI";
pub const ACL_ID_ADDED: &str = "AAAANDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI";

/// Resource group and a standard LRS storage account.
fn template(data: &TestData) -> Document {
    let resource_group = Block::resource("azurerm_resource_group", "test")
        .attr("name", Expr::string(format!("acctestRG-{}", data.random_integer)))
        .attr("location", Expr::string(&data.locations.primary));

    let account = Block::resource(PARENT_TYPE, "test")
        .attr("name", Expr::string(format!("acctestacc{}", data.random_string)))
        .attr("resource_group_name", Expr::reference("azurerm_resource_group.test.name"))
        .attr("location", Expr::reference("azurerm_resource_group.test.location"))
        .attr("account_tier", Expr::string("Standard"))
        .attr("account_replication_type", Expr::string("LRS"))
        .attr("tags", Expr::string_map([("environment", "staging")]));

    Document::new().push(resource_group).push(account)
}

fn share(data: &TestData) -> Block {
    Block::resource(RESOURCE_TYPE, &data.resource_label)
        .attr("name", Expr::string(format!("testshare{}", data.random_string)))
        .attr("resource_group_name", Expr::reference("azurerm_resource_group.test.name"))
        .attr("storage_account_name", Expr::reference("azurerm_storage_account.test.name"))
}

fn acl(id: &str) -> Block {
    let policy = Block::nested("access_policy")
        .attr("permissions", Expr::string("rwd"))
        .attr("start", Expr::string("2019-07-02T09:38:21.0000000Z"))
        .attr("expiry", Expr::string("2019-07-02T10:38:21.0000000Z"));
    Block::nested("acl").attr("id", Expr::string(id)).block(policy)
}

pub fn basic(data: &TestData) -> Document {
    template(data).push(share(data))
}

pub fn metadata(data: &TestData) -> Document {
    let block = share(data).attr("metadata", Expr::string_map([("hello", "world")]));
    template(data).push(block)
}

pub fn metadata_updated(data: &TestData) -> Document {
    let block = share(data).attr(
        "metadata",
        Expr::string_map([("hello", "world"), ("happy", "birthday")]),
    );
    template(data).push(block)
}

pub fn acl_single(data: &TestData) -> Document {
    template(data).push(share(data).block(acl(ACL_ID_ORIGINAL)))
}

/// Adds a second identifier ahead of the original one.
pub fn acl_updated(data: &TestData) -> Document {
    let block = share(data)
        .block(acl(ACL_ID_ADDED))
        .block(acl(ACL_ID_ORIGINAL));
    template(data).push(block)
}

/// Drops the original identifier and keeps only the added one.
pub fn acl_replaced(data: &TestData) -> Document {
    template(data).push(share(data).block(acl(ACL_ID_ADDED)))
}

/// [`basic`] plus a second block declaring the same share under `import`.
pub fn requires_import(data: &TestData) -> Document {
    let existing = format!("{}.{}", RESOURCE_TYPE, data.resource_label);
    let duplicate = Block::resource(RESOURCE_TYPE, "import")
        .attr("name", Expr::reference(&format!("{}.name", existing)))
        .attr(
            "resource_group_name",
            Expr::reference(&format!("{}.resource_group_name", existing)),
        )
        .attr(
            "storage_account_name",
            Expr::reference(&format!("{}.storage_account_name", existing)),
        );
    basic(data).push(duplicate)
}

pub fn update_quota(data: &TestData) -> Document {
    template(data).push(share(data).attr("quota", Expr::number(5)))
}
